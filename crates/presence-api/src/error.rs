//! Error types for the HTTP layer.
//!
//! [`ApiError`] covers failures that are not ledger outcomes: malformed
//! requests, unknown badges on queries, and store outages. It converts into
//! an error [`Envelope`] via its [`IntoResponse`] implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use presence_ledger::LedgerError;

use crate::envelope::Envelope;

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The badge path segment was blank.
    #[error("badge identifier must not be empty")]
    EmptyBadge,

    /// The requested resource was not found.
    #[error("{0}")]
    NotFound(String),

    /// The ledger could not reach its store.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::EmptyBadge => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Ledger(e) => {
                tracing::error!(error = %e, "Request failed on store");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    String::from("Presence store is unavailable, retry later"),
                )
            }
        };

        Envelope::error(message).into_response_with(status)
    }
}
