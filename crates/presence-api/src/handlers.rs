//! REST endpoint handlers.
//!
//! Scan handlers stamp the event with [`AppState::clock`] and pass it to
//! the ledger; the resulting [`Outcome`] picks the HTTP status. Query
//! handlers wrap the projections from [`PresenceQuery`](presence_ledger::PresenceQuery).
//!
//! # Endpoints
//!
//! | Method | Path | Alias | Description |
//! |--------|------|-------|-------------|
//! | `POST` | `/entry/{badge}` | `/walkin/{badge}` | Record an entry scan |
//! | `POST` | `/exit/{badge}` | `/walkout/{badge}` | Record an exit scan |
//! | `GET` | `/entity/{badge}/history` | `/student/{badge}/attendance` | Sessions of one entity |
//! | `GET` | `/occupancy` | `/dashboard/present` | Everyone currently present |
//! | `GET` | `/history` | `/dashboard/history` | Every session |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use presence_types::{BadgeId, Outcome};

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::state::AppState;

fn parse_badge(raw: &str) -> Result<BadgeId, ApiError> {
    BadgeId::parse(raw).ok_or(ApiError::EmptyBadge)
}

// ---------------------------------------------------------------------------
// POST /entry/{badge}, POST /exit/{badge} -- scan events
// ---------------------------------------------------------------------------

/// Record an entry scan stamped with the server clock.
pub async fn record_entry(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let badge_id = parse_badge(&raw)?;
    let outcome = state.ledger.record_entry(&badge_id, state.clock.now()).await?;
    Ok(outcome_response(&outcome))
}

/// Record an exit scan stamped with the server clock.
pub async fn record_exit(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let badge_id = parse_badge(&raw)?;
    let outcome = state.ledger.record_exit(&badge_id, state.clock.now()).await?;
    Ok(outcome_response(&outcome))
}

/// Map a ledger outcome to its status code and envelope.
pub fn outcome_response(outcome: &Outcome) -> Response {
    match outcome {
        Outcome::Opened {
            badge_id,
            entity_id,
            session_id,
            entry_time,
        } => Envelope::success(
            "Entry recorded",
            serde_json::json!({
                "badge_id": badge_id,
                "entity_id": entity_id,
                "session_id": session_id,
                "entry_time": entry_time,
            }),
        )
        .into_response_with(StatusCode::OK),

        Outcome::Closed {
            badge_id,
            entity_id,
            session_id,
            entry_time,
            exit_time,
            duration,
        } => Envelope::success(
            "Exit recorded",
            serde_json::json!({
                "badge_id": badge_id,
                "entity_id": entity_id,
                "session_id": session_id,
                "entry_time": entry_time,
                "exit_time": exit_time,
                "duration_seconds": duration.whole_seconds(),
                "duration": duration.to_string(),
            }),
        )
        .into_response_with(StatusCode::OK),

        Outcome::EntityUnknown { badge_id } => Envelope::rejection(
            "Entity not found",
            serde_json::json!({ "badge_id": badge_id }),
        )
        .into_response_with(StatusCode::NOT_FOUND),

        Outcome::AlreadyPresent {
            badge_id,
            entity_id,
        } => Envelope::rejection(
            "Entity is already present",
            serde_json::json!({ "badge_id": badge_id, "entity_id": entity_id }),
        )
        .into_response_with(StatusCode::CONFLICT),

        Outcome::NotPresent {
            badge_id,
            entity_id,
        } => Envelope::rejection(
            "No open session to close",
            serde_json::json!({ "badge_id": badge_id, "entity_id": entity_id }),
        )
        .into_response_with(StatusCode::NOT_FOUND),

        Outcome::InvalidTiming {
            badge_id,
            entity_id,
            session_id,
            entry_time,
            attempted_exit,
        } => Envelope::rejection(
            "Exit time must be after entry time",
            serde_json::json!({
                "badge_id": badge_id,
                "entity_id": entity_id,
                "session_id": session_id,
                "entry_time": entry_time,
                "attempted_exit": attempted_exit,
            }),
        )
        .into_response_with(StatusCode::BAD_REQUEST),
    }
}

// ---------------------------------------------------------------------------
// GET /entity/{badge}/history -- one entity's sessions
// ---------------------------------------------------------------------------

/// Return every session of the entity behind `badge`, most recent first.
pub async fn entity_history(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let badge_id = parse_badge(&raw)?;
    let (entity, sessions) = state
        .query
        .history_for_badge(&badge_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(String::from("Entity not found")))?;

    Ok(Envelope::success(
        "History retrieved",
        serde_json::json!({
            "badge_id": entity.badge_id,
            "entity_id": entity.id,
            "name": entity.name,
            "department": entity.department,
            "count": sessions.len(),
            "sessions": sessions,
        }),
    )
    .into_response_with(StatusCode::OK))
}

// ---------------------------------------------------------------------------
// GET /occupancy, GET /history -- facility-wide views
// ---------------------------------------------------------------------------

/// Return everyone currently present, earliest arrival first.
pub async fn occupancy(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let present = state.query.current_occupancy().await?;
    Ok(
        Envelope::success("Current occupancy retrieved", present)
            .into_response_with(StatusCode::OK),
    )
}

/// Return every session of every entity, most recent first.
pub async fn history(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let sessions = state.query.full_history().await?;
    Ok(Envelope::success("History retrieved", sessions).into_response_with(StatusCode::OK))
}
