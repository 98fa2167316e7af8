//! Store traits shared by the `PostgreSQL` and in-memory backends.
//!
//! [`SessionStore`] owns the session records and is the only place where
//! the "at most one open session per entity" invariant is enforced.
//! [`EntityDirectory`] maps external badges to entities and is read-only
//! from the ledger's point of view.
//!
//! Both traits are object safe so the ledger can hold them behind
//! `Arc<dyn ...>` handles constructed at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use presence_types::{
    BadgeId, Entity, EntityId, OpenSession, Session, SessionDuration, SessionId,
};

use crate::error::DbError;

/// Invariant-level signals from the session store.
///
/// `Conflict`, `NoOpenSession` and `NonPositiveDuration` are expected
/// outcomes that the ledger translates into caller-facing results. Only
/// `Unavailable` represents an infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The entity already has an open session.
    #[error("entity {entity_id} already has an open session")]
    Conflict {
        /// The entity whose open was rejected.
        entity_id: EntityId,
    },

    /// The entity has no open session to close.
    #[error("entity {entity_id} has no open session")]
    NoOpenSession {
        /// The entity whose close was rejected.
        entity_id: EntityId,
    },

    /// The requested exit time is not after the open session's entry time.
    /// The open session is left untouched.
    #[error("exit at {exit_time} is not after entry at {entry_time} (session {session_id})")]
    NonPositiveDuration {
        /// The open session.
        session_id: SessionId,
        /// Its entry time.
        entry_time: DateTime<Utc>,
        /// The rejected exit time.
        exit_time: DateTime<Utc>,
    },

    /// The backing store failed.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] DbError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(DbError::Postgres(err))
    }
}

/// The record returned by a successful close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    /// The session that was closed.
    pub session_id: SessionId,
    /// Its owner.
    pub entity_id: EntityId,
    /// Its entry time.
    pub entry_time: DateTime<Utc>,
    /// The exit time just recorded.
    pub exit_time: DateTime<Utc>,
    /// `exit_time - entry_time`, as stored.
    pub duration: SessionDuration,
}

/// Read-only badge resolution.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    /// Resolve a badge to its entity, or `None` if the badge is unknown.
    async fn resolve(&self, badge_id: &BadgeId) -> Result<Option<Entity>, DbError>;
}

/// Durable, queryable collection of presence sessions.
///
/// `open_session` and `close_latest_open_session` are each a single atomic
/// unit: two concurrent opens for one entity never both succeed, and a close
/// racing an open observes either zero or one open session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically open a session for `entity_id` entering at `at`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if an open session already exists.
    async fn open_session(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<SessionId, StoreError>;

    /// Atomically close the entity's most recently opened open session.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoOpenSession`] if there is none, and
    /// [`StoreError::NonPositiveDuration`] if `at` is not after its entry.
    async fn close_latest_open_session(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<ClosedSession, StoreError>;

    /// All open sessions, earliest entry first.
    async fn list_open_sessions(&self) -> Result<Vec<OpenSession>, DbError>;

    /// All sessions of one entity, most recent entry first.
    async fn list_sessions_for_entity(&self, entity_id: EntityId) -> Result<Vec<Session>, DbError>;

    /// Every session with its owner, most recent entry first.
    async fn list_all_sessions(&self) -> Result<Vec<(Entity, Session)>, DbError>;
}
