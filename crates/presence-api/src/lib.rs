//! HTTP surface for the presence ledger.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **Scan endpoints** (`POST /entry/{badge}`, `POST /exit/{badge}`) that
//!   stamp the event with the server clock and hand it to the
//!   [`SessionLedger`](presence_ledger::SessionLedger)
//! - **Query endpoints** for current occupancy, per-entity history, and the
//!   full session history
//! - The legacy walk-in/walk-out paths as aliases of the above
//!
//! Every response, success or failure, is wrapped in the same
//! [`Envelope`](envelope::Envelope): `{status, message, data?}`.

pub mod envelope;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use envelope::Envelope;
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
