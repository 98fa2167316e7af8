//! Data layer for the presence session ledger.
//!
//! Holds the two durable relations the ledger depends on: the entity
//! directory (badge to entity resolution, read-only here) and the session
//! table. The "one open session per entity" rule is enforced by the store
//! itself, never by calling code.
//!
//! # Architecture
//!
//! ```text
//! SessionLedger
//!     |
//!     +-- resolve badge ---------> EntityDirectory
//!     |                              |-- PgEntityDirectory (entities table)
//!     |                              +-- MemoryStore
//!     |
//!     +-- open / close / list ---> SessionStore
//!                                    |-- PgSessionStore   (sessions table,
//!                                    |                     partial unique index)
//!                                    +-- MemoryStore      (single lock)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- Store traits and the store-level error signals
//! - [`postgres`] -- `PostgreSQL` connection pool, configuration, migrations
//! - [`session_store`] -- `PostgreSQL` session table operations
//! - [`entity_directory`] -- `PostgreSQL` entity lookups
//! - [`memory`] -- In-memory implementation of both traits
//! - [`error`] -- Shared error types

pub mod entity_directory;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod session_store;
pub mod store;

// Re-export primary types for convenience.
pub use entity_directory::PgEntityDirectory;
pub use error::DbError;
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use session_store::PgSessionStore;
pub use store::{ClosedSession, EntityDirectory, SessionStore, StoreError};
