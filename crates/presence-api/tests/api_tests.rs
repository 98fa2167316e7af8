//! Integration tests for the presence API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. The clock is manual so scan timestamps are
//! deterministic.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use presence_api::{AppState, build_router};
use presence_db::{ClosedSession, DbError, MemoryStore, SessionStore, StoreError};
use presence_ledger::Clock;
use presence_types::{BadgeId, Entity, EntityId, OpenSession, Session, SessionId};
use serde_json::Value;
use tower::ServiceExt;

/// A clock that only moves when told to.
struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn advance(&self, by: TimeDelta) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Harness {
    router: Router,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn request(&self, method: &str, path: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    async fn post(&self, path: &str) -> (StatusCode, Value) {
        self.request("POST", path).await
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.request("GET", path).await
    }
}

async fn make_harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    make_harness_with(store.clone(), store).await
}

/// Register the two test entities in `directory` and serve over `sessions`.
async fn make_harness_with(
    directory: Arc<MemoryStore>,
    sessions: Arc<dyn SessionStore>,
) -> Harness {
    directory
        .register_entity(BadgeId::parse("S-100").unwrap(), "Ada Lovelace", Some("Mathematics"))
        .await
        .unwrap();
    directory
        .register_entity(BadgeId::parse("S-200").unwrap(), "Alan Turing", None)
        .await
        .unwrap();

    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock(Mutex::new(start)));
    let state = AppState::new(directory, sessions, clock.clone(), Duration::from_secs(1));

    Harness {
        router: build_router(Arc::new(state)),
        clock,
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// Scan events
// =========================================================================

#[tokio::test]
async fn test_entry_opens_session() {
    let h = make_harness().await;
    let (status, json) = h.post("/entry/S-100").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["data"]["badge_id"], "S-100");
    assert_eq!(json["data"]["entry_time"], "2024-03-01T09:00:00Z");
    assert!(json["data"]["session_id"].is_string());
}

#[tokio::test]
async fn test_double_entry_is_conflict() {
    let h = make_harness().await;
    h.post("/entry/S-100").await;
    h.clock.advance(TimeDelta::seconds(5));
    let (status, json) = h.post("/entry/S-100").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_exit_reports_duration() {
    let h = make_harness().await;
    h.post("/entry/S-100").await;
    h.clock.advance(TimeDelta::seconds(3_725));
    let (status, json) = h.post("/exit/S-100").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["exit_time"], "2024-03-01T10:02:05Z");
    assert_eq!(json["data"]["duration_seconds"], 3_725);
    assert_eq!(json["data"]["duration"], "01:02:05");
}

#[tokio::test]
async fn test_exit_without_entry_is_not_found() {
    let h = make_harness().await;
    let (status, json) = h.post("/exit/S-200").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "No open session to close");
}

#[tokio::test]
async fn test_exit_at_entry_instant_is_bad_request() {
    let h = make_harness().await;
    h.post("/entry/S-100").await;
    let (status, json) = h.post("/exit/S-100").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["entry_time"], json["data"]["attempted_exit"]);

    let (_, occupancy) = h.get("/occupancy").await;
    assert_eq!(occupancy["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_badge_is_not_found() {
    let h = make_harness().await;
    let (entry, _) = h.post("/entry/NOBODY").await;
    let (exit, _) = h.post("/exit/NOBODY").await;
    let (history, json) = h.get("/entity/NOBODY/history").await;

    assert_eq!(entry, StatusCode::NOT_FOUND);
    assert_eq!(exit, StatusCode::NOT_FOUND);
    assert_eq!(history, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
    assert!(json.get("data").is_none());
}

#[tokio::test]
async fn test_blank_badge_is_bad_request() {
    let h = make_harness().await;
    let (status, json) = h.post("/entry/%20%20").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_get_on_scan_route_is_rejected() {
    let h = make_harness().await;
    let response = h
        .router
        .clone()
        .oneshot(Request::get("/entry/S-100").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// =========================================================================
// Queries
// =========================================================================

#[tokio::test]
async fn test_occupancy_follows_scans() {
    let h = make_harness().await;
    h.post("/entry/S-100").await;
    h.clock.advance(TimeDelta::minutes(1));
    h.post("/entry/S-200").await;

    let (status, json) = h.get("/occupancy").await;
    assert_eq!(status, StatusCode::OK);
    let present = json["data"].as_array().unwrap();
    assert_eq!(present.len(), 2);
    assert_eq!(present[0]["name"], "Ada Lovelace");
    assert_eq!(present[0]["department"], "Mathematics");
    assert_eq!(present[1]["name"], "Alan Turing");

    h.clock.advance(TimeDelta::minutes(1));
    h.post("/exit/S-100").await;
    let (_, json) = h.get("/occupancy").await;
    let present = json["data"].as_array().unwrap();
    assert_eq!(present.len(), 1);
    assert_eq!(present[0]["badge_id"], "S-200");
}

#[tokio::test]
async fn test_empty_occupancy_is_empty_list() {
    let h = make_harness().await;
    let (status, json) = h.get("/occupancy").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], serde_json::json!([]));
}

#[tokio::test]
async fn test_entity_history() {
    let h = make_harness().await;
    h.post("/entry/S-100").await;
    h.clock.advance(TimeDelta::hours(1));
    h.post("/exit/S-100").await;
    h.clock.advance(TimeDelta::hours(1));
    h.post("/entry/S-100").await;

    let (status, json) = h.get("/entity/S-100/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "Ada Lovelace");
    assert_eq!(json["data"]["count"], 2);

    let sessions = json["data"]["sessions"].as_array().unwrap();
    assert_eq!(sessions[0]["entry_time"], "2024-03-01T11:00:00Z");
    assert!(sessions[0]["exit_time"].is_null());
    assert_eq!(sessions[1]["duration"], "01:00:00");
    assert_eq!(sessions[1]["duration_seconds"], 3_600);
}

#[tokio::test]
async fn test_full_history() {
    let h = make_harness().await;
    h.post("/entry/S-100").await;
    h.clock.advance(TimeDelta::minutes(30));
    h.post("/entry/S-200").await;
    h.clock.advance(TimeDelta::minutes(30));
    h.post("/exit/S-100").await;

    let (status, json) = h.get("/history").await;
    assert_eq!(status, StatusCode::OK);
    let sessions = json["data"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["badge_id"], "S-200");
    assert_eq!(sessions[1]["badge_id"], "S-100");
    assert_eq!(sessions[1]["duration"], "01:00:00");
}

// =========================================================================
// Legacy aliases
// =========================================================================

#[tokio::test]
async fn test_walk_in_walk_out_aliases() {
    let h = make_harness().await;
    let (walk_in, _) = h.post("/walkin/S-200").await;
    h.clock.advance(TimeDelta::minutes(45));

    let (present, json) = h.get("/dashboard/present").await;
    assert_eq!(present, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let (walk_out, _) = h.post("/walkout/S-200").await;
    let (attendance, json) = h.get("/student/S-200/attendance").await;
    let (dashboard, all) = h.get("/dashboard/history").await;

    assert_eq!(walk_in, StatusCode::OK);
    assert_eq!(walk_out, StatusCode::OK);
    assert_eq!(attendance, StatusCode::OK);
    assert_eq!(json["data"]["sessions"][0]["duration"], "00:45:00");
    assert_eq!(dashboard, StatusCode::OK);
    assert_eq!(all["data"].as_array().unwrap().len(), 1);
}

// =========================================================================
// Store outages
// =========================================================================

/// A session store that refuses every call.
struct DownStore;

#[async_trait]
impl SessionStore for DownStore {
    async fn open_session(
        &self,
        _entity_id: EntityId,
        _at: DateTime<Utc>,
    ) -> Result<SessionId, StoreError> {
        Err(DbError::Config("connection refused".to_owned()).into())
    }

    async fn close_latest_open_session(
        &self,
        _entity_id: EntityId,
        _at: DateTime<Utc>,
    ) -> Result<ClosedSession, StoreError> {
        Err(DbError::Config("connection refused".to_owned()).into())
    }

    async fn list_open_sessions(&self) -> Result<Vec<OpenSession>, DbError> {
        Err(DbError::Config("connection refused".to_owned()))
    }

    async fn list_sessions_for_entity(
        &self,
        _entity_id: EntityId,
    ) -> Result<Vec<Session>, DbError> {
        Err(DbError::Config("connection refused".to_owned()))
    }

    async fn list_all_sessions(&self) -> Result<Vec<(Entity, Session)>, DbError> {
        Err(DbError::Config("connection refused".to_owned()))
    }
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let h = make_harness_with(Arc::new(MemoryStore::new()), Arc::new(DownStore)).await;

    for (method, path) in [
        ("POST", "/entry/S-100"),
        ("POST", "/exit/S-100"),
        ("GET", "/occupancy"),
        ("GET", "/entity/S-100/history"),
        ("GET", "/history"),
    ] {
        let (status, json) = h.request(method, path).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{method} {path}");
        assert_eq!(json["status"], "error", "{method} {path}");
        assert!(json.get("data").is_none(), "{method} {path}");
    }
}
