//! Shared type definitions for the presence session ledger.
//!
//! This crate is the single source of truth for the identifiers, domain
//! records, and read projections used across the workspace. Projection
//! types flow downstream to `TypeScript` via `ts-rs` for dashboard clients.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers and the external badge identifier
//! - [`structs`] -- Entities, sessions, durations, and read projections
//! - [`outcome`] -- The caller-facing result of a scan event

pub mod ids;
pub mod outcome;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use ids::{BadgeId, EntityId, SessionId};
pub use outcome::Outcome;
pub use structs::{
    Entity, EntityHistoryEntry, HistoryEntry, OccupancyEntry, OpenSession, Session,
    SessionDuration,
};

#[cfg(test)]
mod tests {
    //! Integration tests for type exports and `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Types with #[ts(export)] write their bindings into `bindings/`
        // relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::EntityId::export_all();
        let _ = crate::ids::SessionId::export_all();
        let _ = crate::ids::BadgeId::export_all();
        let _ = crate::structs::OccupancyEntry::export_all();
        let _ = crate::structs::HistoryEntry::export_all();
        let _ = crate::structs::EntityHistoryEntry::export_all();
    }
}
