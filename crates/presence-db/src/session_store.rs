//! `PostgreSQL` session table operations.
//!
//! The invariants live in the schema (see `migrations/0001_presence.sql`):
//!
//! - a partial unique index on `sessions(entity_id) WHERE exit_time IS NULL`
//!   admits at most one open session per entity,
//! - CHECK constraints keep `exit_time > entry_time` and pin `duration_us`
//!   to exactly `exit_time - entry_time`,
//! - a trigger rejects reopening, amending, or deleting sessions.
//!
//! Opening is one `INSERT ... ON CONFLICT DO NOTHING` inside an explicit
//! transaction, so a caller that gives up before `COMMIT` leaves no row.
//! Closing is one transaction that row-locks the entity's open session
//! before the conditional update, so concurrent closers serialize on the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use presence_types::{Entity, EntityId, OpenSession, Session, SessionDuration, SessionId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entity_directory::EntityRow;
use crate::error::DbError;
use crate::store::{ClosedSession, SessionStore, StoreError};

/// Operations on the `sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Create a new session store bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn open_session(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<SessionId, StoreError> {
        let session = Session::open(entity_id, at);
        let mut tx = self.pool.begin().await?;

        // The conflict target names the partial unique index, so a second
        // open for the same entity inserts nothing and returns no row.
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r"INSERT INTO sessions (id, entity_id, entry_time)
              VALUES ($1, $2, $3)
              ON CONFLICT (entity_id) WHERE exit_time IS NULL DO NOTHING
              RETURNING id",
        )
        .bind(session.id.into_inner())
        .bind(entity_id.into_inner())
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        match inserted {
            Some(id) => {
                tx.commit().await?;
                tracing::debug!(%entity_id, session_id = %id, "Opened session");
                Ok(SessionId::from(id))
            }
            None => Err(StoreError::Conflict { entity_id }),
        }
    }

    async fn close_latest_open_session(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<ClosedSession, StoreError> {
        let mut tx = self.pool.begin().await?;

        let open = sqlx::query_as::<_, OpenRow>(
            r"SELECT id, entry_time
              FROM sessions
              WHERE entity_id = $1 AND exit_time IS NULL
              ORDER BY entry_time DESC, id DESC
              FOR UPDATE",
        )
        .bind(entity_id.into_inner())
        .fetch_all(&mut *tx)
        .await?;

        // Dropping `tx` on any early return rolls the transaction back.
        let Some(latest) = open.first() else {
            return Err(StoreError::NoOpenSession { entity_id });
        };

        if open.len() > 1 {
            tracing::error!(
                %entity_id,
                open_sessions = open.len(),
                chosen_session = %latest.id,
                "Consistency violation: more than one open session for entity"
            );
        }

        let session_id = SessionId::from(latest.id);
        let Some(duration) = SessionDuration::between(latest.entry_time, at) else {
            return Err(StoreError::NonPositiveDuration {
                session_id,
                entry_time: latest.entry_time,
                exit_time: at,
            });
        };
        let duration_us = duration.as_micros().ok_or_else(|| {
            DbError::InvalidData(format!("duration of session {session_id} overflows"))
        })?;

        let result = sqlx::query(
            r"UPDATE sessions
              SET exit_time = $2, duration_us = $3
              WHERE id = $1 AND exit_time IS NULL",
        )
        .bind(latest.id)
        .bind(at)
        .bind(duration_us)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::NoOpenSession { entity_id });
        }

        tx.commit().await?;

        tracing::debug!(%entity_id, %session_id, duration_us, "Closed session");

        Ok(ClosedSession {
            session_id,
            entity_id,
            entry_time: latest.entry_time,
            exit_time: at,
            duration,
        })
    }

    async fn list_open_sessions(&self) -> Result<Vec<OpenSession>, DbError> {
        let rows = sqlx::query_as::<_, OpenSessionRow>(
            r"SELECT e.id, e.badge_id, e.name, e.department,
                     s.id AS session_id, s.entry_time
              FROM sessions s
              JOIN entities e ON e.id = s.entity_id
              WHERE s.exit_time IS NULL
              ORDER BY s.entry_time ASC, s.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OpenSession::try_from).collect()
    }

    async fn list_sessions_for_entity(&self, entity_id: EntityId) -> Result<Vec<Session>, DbError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r"SELECT id AS session_id, entity_id, entry_time, exit_time, duration_us
              FROM sessions
              WHERE entity_id = $1
              ORDER BY entry_time DESC, id DESC",
        )
        .bind(entity_id.into_inner())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn list_all_sessions(&self) -> Result<Vec<(Entity, Session)>, DbError> {
        let rows = sqlx::query_as::<_, EntitySessionRow>(
            r"SELECT e.id, e.badge_id, e.name, e.department,
                     s.id AS session_id, s.entity_id, s.entry_time, s.exit_time, s.duration_us
              FROM sessions s
              JOIN entities e ON e.id = s.entity_id
              ORDER BY s.entry_time DESC, s.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((Entity::try_from(row.entity)?, Session::try_from(row.session)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// The locked open row read while closing.
#[derive(Debug, Clone, sqlx::FromRow)]
struct OpenRow {
    id: Uuid,
    entry_time: DateTime<Utc>,
}

/// A row from the `sessions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Session UUID.
    pub session_id: Uuid,
    /// Owning entity UUID.
    pub entity_id: Uuid,
    /// Entry timestamp.
    pub entry_time: DateTime<Utc>,
    /// Exit timestamp, `NULL` while open.
    pub exit_time: Option<DateTime<Utc>>,
    /// Duration in microseconds, `NULL` while open.
    pub duration_us: Option<i64>,
}

impl TryFrom<SessionRow> for Session {
    type Error = DbError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let duration = match (row.exit_time, row.duration_us) {
            (None, None) => None,
            (Some(_), Some(us)) => Some(SessionDuration::from_micros(us).ok_or_else(|| {
                DbError::InvalidData(format!(
                    "session {} has non-positive duration {us}us",
                    row.session_id
                ))
            })?),
            _ => {
                return Err(DbError::InvalidData(format!(
                    "session {} has exit_time and duration out of step",
                    row.session_id
                )));
            }
        };

        Ok(Self {
            id: SessionId::from(row.session_id),
            entity_id: EntityId::from(row.entity_id),
            entry_time: row.entry_time,
            exit_time: row.exit_time,
            duration,
        })
    }
}

/// An open session joined with its entity.
#[derive(Debug, Clone, sqlx::FromRow)]
struct OpenSessionRow {
    #[sqlx(flatten)]
    entity: EntityRow,
    session_id: Uuid,
    entry_time: DateTime<Utc>,
}

impl TryFrom<OpenSessionRow> for OpenSession {
    type Error = DbError;

    fn try_from(row: OpenSessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            entity: Entity::try_from(row.entity)?,
            session_id: SessionId::from(row.session_id),
            entry_time: row.entry_time,
        })
    }
}

/// Any session joined with its entity.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EntitySessionRow {
    #[sqlx(flatten)]
    entity: EntityRow,
    #[sqlx(flatten)]
    session: SessionRow,
}
