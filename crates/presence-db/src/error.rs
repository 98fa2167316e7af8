//! Error types for the data layer.
//!
//! Infrastructure failures are carried by [`DbError`], which wraps the
//! underlying [`sqlx`] errors with context about what went wrong. The
//! invariant-level signals of the session store live in
//! [`StoreError`](crate::store::StoreError).

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped to a domain value, or a value could
    /// not be represented in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// An entity with this badge is already registered.
    #[error("duplicate badge: {0}")]
    DuplicateBadge(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
