//! Session Ledger and Query Layer for facility presence tracking.
//!
//! The [`SessionLedger`] turns entry and exit scan events into session store
//! operations and caller-facing [`Outcome`]s. The [`PresenceQuery`] layer
//! projects the store into occupancy and history views.
//!
//! # Per-entity state machine
//!
//! Presence is derived from the store, never stored separately:
//!
//! ```text
//!            record_entry (Opened)
//!   ABSENT ------------------------> PRESENT
//!      ^                                |
//!      +--------------------------------+
//!            record_exit (Closed)
//! ```
//!
//! Entry while `PRESENT` yields `AlreadyPresent`; exit while `ABSENT` yields
//! `NotPresent`. Neither touches the store.
//!
//! # Failure model
//!
//! Every store call is bounded by a timeout. A timeout or backend failure
//! surfaces as [`LedgerError::StoreUnavailable`]; expected rejections are
//! ordinary outcomes.
//!
//! [`Outcome`]: presence_types::Outcome

pub mod clock;
pub mod deadline;
pub mod error;
pub mod ledger;
pub mod query;

// Re-export primary types for convenience.
pub use clock::{Clock, SystemClock};
pub use error::LedgerError;
pub use ledger::SessionLedger;
pub use query::PresenceQuery;
