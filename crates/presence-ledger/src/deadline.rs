//! Bounded store calls.
//!
//! No store operation may hang a caller: each one runs under
//! [`tokio::time::timeout`] and an elapsed deadline becomes
//! [`LedgerError::StoreUnavailable`].

use std::future::Future;
use std::time::Duration;

use crate::error::LedgerError;

/// Default limit for a single store operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `operation` with a deadline of `limit`.
///
/// # Errors
///
/// Returns [`LedgerError::StoreUnavailable`] if the deadline elapses. The
/// inner result is returned untouched otherwise.
pub async fn within<F>(
    limit: Duration,
    name: &'static str,
    operation: F,
) -> Result<F::Output, LedgerError>
where
    F: Future,
{
    tokio::time::timeout(limit, operation).await.map_err(|_elapsed| {
        tracing::error!(
            operation = name,
            timeout_ms = limit.as_millis(),
            "Store operation timed out"
        );
        LedgerError::StoreUnavailable {
            operation: name,
            reason: format!("timed out after {}ms", limit.as_millis()),
        }
    })
}
