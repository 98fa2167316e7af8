//! Shared application state for the API server.

use std::sync::Arc;
use std::time::Duration;

use presence_db::{EntityDirectory, SessionStore};
use presence_ledger::{Clock, PresenceQuery, SessionLedger};

/// Handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Entry/exit processing.
    pub ledger: SessionLedger,
    /// Occupancy and history projections.
    pub query: PresenceQuery,
    /// Timestamps scan events.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire the ledger and query layer over one directory and store.
    pub fn new(
        directory: Arc<dyn EntityDirectory>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            ledger: SessionLedger::new(Arc::clone(&directory), Arc::clone(&store))
                .with_timeout(operation_timeout),
            query: PresenceQuery::new(directory, store).with_timeout(operation_timeout),
            clock,
        }
    }
}
