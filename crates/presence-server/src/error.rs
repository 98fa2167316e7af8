//! Error types for the service binary.
//!
//! [`StartupError`] wraps every failure that can stop the service, so
//! `main` can propagate with `?`.

use presence_db::DbError;

use crate::config::ConfigError;

/// Top-level error for the presence service.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Connecting to, migrating, or seeding the store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: DbError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: presence_api::ServerError,
    },
}
