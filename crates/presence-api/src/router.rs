//! Axum router construction.
//!
//! Assembles the scan and query routes into a single [`Router`] with CORS
//! and request tracing enabled.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
///
/// The router includes:
/// - `POST /entry/{badge}` (alias `/walkin/{badge}`)
/// - `POST /exit/{badge}` (alias `/walkout/{badge}`)
/// - `GET /entity/{badge}/history` (alias `/student/{badge}/attendance`)
/// - `GET /occupancy` (alias `/dashboard/present`)
/// - `GET /history` (alias `/dashboard/history`)
///
/// CORS allows any origin, method, and header so browser dashboards on other
/// hosts can call the API.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Scan events
        .route("/entry/{badge}", post(handlers::record_entry))
        .route("/exit/{badge}", post(handlers::record_exit))
        .route("/walkin/{badge}", post(handlers::record_entry))
        .route("/walkout/{badge}", post(handlers::record_exit))
        // Queries
        .route("/entity/{badge}/history", get(handlers::entity_history))
        .route("/student/{badge}/attendance", get(handlers::entity_history))
        .route("/occupancy", get(handlers::occupancy))
        .route("/dashboard/present", get(handlers::occupancy))
        .route("/history", get(handlers::history))
        .route("/dashboard/history", get(handlers::history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
