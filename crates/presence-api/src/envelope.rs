//! The uniform response body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Whether the request achieved what it asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The request succeeded.
    Success,
    /// The request was rejected or failed.
    Error,
}

/// `{status, message, data?}` wrapper shared by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    /// Success or error.
    pub status: Status,
    /// Human-readable summary.
    pub message: String,
    /// Payload, omitted when there is none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    /// A success envelope carrying `data`.
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    /// An error envelope carrying `data` that explains the rejection.
    pub fn rejection(message: impl Into<String>, data: T) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Render with the given HTTP status.
    pub fn into_response_with(self, code: StatusCode) -> Response {
        (code, Json(self)).into_response()
    }
}

impl Envelope<()> {
    /// An error envelope without a payload.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            data: None,
        }
    }
}
