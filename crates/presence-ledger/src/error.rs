//! Error types for the ledger and query layer.

use presence_db::DbError;

/// Failures the ledger cannot turn into an [`Outcome`](presence_types::Outcome).
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The session store or entity directory failed or timed out. Safe to
    /// retry with backoff. Nothing was written, unless the deadline elapsed
    /// while the store was committing; a retry then reports the committed
    /// state as [`Outcome::AlreadyPresent`](presence_types::Outcome::AlreadyPresent)
    /// or [`Outcome::NotPresent`](presence_types::Outcome::NotPresent).
    #[error("store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        /// The store operation that failed.
        operation: &'static str,
        /// Description of the failure.
        reason: String,
    },
}

impl LedgerError {
    /// Wrap a backend failure for `operation`.
    pub fn unavailable(operation: &'static str, err: &DbError) -> Self {
        Self::StoreUnavailable {
            operation,
            reason: err.to_string(),
        }
    }
}
