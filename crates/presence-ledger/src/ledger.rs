//! Entry and exit event processing.
//!
//! [`SessionLedger`] resolves the scanned badge, performs exactly one atomic
//! store operation, and maps the store's answer to an [`Outcome`]. It holds
//! no state of its own; concurrent callers share nothing but the store.
//!
//! Timestamps are truncated to microseconds on the way in, matching the
//! precision of the durable store, so a session's duration always equals
//! `exit_time - entry_time` as read back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use presence_db::{EntityDirectory, SessionStore, StoreError};
use presence_types::{BadgeId, Entity, Outcome};

use crate::deadline::{DEFAULT_OPERATION_TIMEOUT, within};
use crate::error::LedgerError;

/// Decision engine for entry and exit events.
#[derive(Clone)]
pub struct SessionLedger {
    directory: Arc<dyn EntityDirectory>,
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl SessionLedger {
    /// Create a ledger over the given directory and session store.
    pub fn new(directory: Arc<dyn EntityDirectory>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            directory,
            store,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Set the per-operation store timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve a badge through the entity directory.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the directory fails or
    /// times out.
    pub async fn find_entity(&self, badge_id: &BadgeId) -> Result<Option<Entity>, LedgerError> {
        within(self.timeout, "find_entity", self.directory.resolve(badge_id))
            .await?
            .map_err(|e| LedgerError::unavailable("find_entity", &e))
    }

    /// Process an entry scan for `badge_id` at `at`.
    ///
    /// Opens a session if the entity is absent. An entity that is already
    /// present yields [`Outcome::AlreadyPresent`] and the existing session
    /// is left untouched, so a retried or duplicated entry scan never
    /// creates a second session.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on infrastructure failure;
    /// the store is unchanged in that case.
    pub async fn record_entry(
        &self,
        badge_id: &BadgeId,
        at: DateTime<Utc>,
    ) -> Result<Outcome, LedgerError> {
        let at = at.trunc_subsecs(6);
        let Some(entity) = self.find_entity(badge_id).await? else {
            return Ok(log_outcome(Outcome::EntityUnknown {
                badge_id: badge_id.clone(),
            }));
        };

        let opened = within(
            self.timeout,
            "open_session",
            self.store.open_session(entity.id, at),
        )
        .await?;

        let outcome = match opened {
            Ok(session_id) => Outcome::Opened {
                badge_id: badge_id.clone(),
                entity_id: entity.id,
                session_id,
                entry_time: at,
            },
            Err(StoreError::Conflict { entity_id }) => Outcome::AlreadyPresent {
                badge_id: badge_id.clone(),
                entity_id,
            },
            Err(StoreError::Unavailable(e)) => {
                return Err(LedgerError::unavailable("open_session", &e));
            }
            Err(other) => {
                return Err(LedgerError::StoreUnavailable {
                    operation: "open_session",
                    reason: format!("unexpected store signal: {other}"),
                });
            }
        };

        Ok(log_outcome(outcome))
    }

    /// Process an exit scan for `badge_id` at `at`.
    ///
    /// Closes the entity's open session. An entity with no open session
    /// yields [`Outcome::NotPresent`]; an exit at or before the session's
    /// entry time yields [`Outcome::InvalidTiming`] and the session stays
    /// open.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on infrastructure failure;
    /// the store is unchanged in that case.
    pub async fn record_exit(
        &self,
        badge_id: &BadgeId,
        at: DateTime<Utc>,
    ) -> Result<Outcome, LedgerError> {
        let at = at.trunc_subsecs(6);
        let Some(entity) = self.find_entity(badge_id).await? else {
            return Ok(log_outcome(Outcome::EntityUnknown {
                badge_id: badge_id.clone(),
            }));
        };

        let closed = within(
            self.timeout,
            "close_latest_open_session",
            self.store.close_latest_open_session(entity.id, at),
        )
        .await?;

        let outcome = match closed {
            Ok(closed) => Outcome::Closed {
                badge_id: badge_id.clone(),
                entity_id: closed.entity_id,
                session_id: closed.session_id,
                entry_time: closed.entry_time,
                exit_time: closed.exit_time,
                duration: closed.duration,
            },
            Err(StoreError::NoOpenSession { entity_id }) => Outcome::NotPresent {
                badge_id: badge_id.clone(),
                entity_id,
            },
            Err(StoreError::NonPositiveDuration {
                session_id,
                entry_time,
                exit_time,
            }) => Outcome::InvalidTiming {
                badge_id: badge_id.clone(),
                entity_id: entity.id,
                session_id,
                entry_time,
                attempted_exit: exit_time,
            },
            Err(StoreError::Unavailable(e)) => {
                return Err(LedgerError::unavailable("close_latest_open_session", &e));
            }
            Err(other @ StoreError::Conflict { .. }) => {
                return Err(LedgerError::StoreUnavailable {
                    operation: "close_latest_open_session",
                    reason: format!("unexpected store signal: {other}"),
                });
            }
        };

        Ok(log_outcome(outcome))
    }
}

fn log_outcome(outcome: Outcome) -> Outcome {
    match &outcome {
        Outcome::Opened {
            badge_id,
            entity_id,
            session_id,
            entry_time,
        } => tracing::info!(
            badge = %badge_id,
            %entity_id,
            %session_id,
            %entry_time,
            outcome = outcome.kind(),
            "Entry recorded"
        ),
        Outcome::Closed {
            badge_id,
            entity_id,
            session_id,
            duration,
            ..
        } => tracing::info!(
            badge = %badge_id,
            %entity_id,
            %session_id,
            duration = %duration,
            outcome = outcome.kind(),
            "Exit recorded"
        ),
        Outcome::EntityUnknown { badge_id } => {
            tracing::info!(badge = %badge_id, outcome = outcome.kind(), "Scan rejected");
        }
        Outcome::AlreadyPresent {
            badge_id,
            entity_id,
        }
        | Outcome::NotPresent {
            badge_id,
            entity_id,
        } => tracing::info!(
            badge = %badge_id,
            %entity_id,
            outcome = outcome.kind(),
            "Scan rejected"
        ),
        Outcome::InvalidTiming {
            badge_id,
            entity_id,
            session_id,
            entry_time,
            attempted_exit,
        } => tracing::warn!(
            badge = %badge_id,
            %entity_id,
            %session_id,
            %entry_time,
            %attempted_exit,
            outcome = outcome.kind(),
            "Exit not after entry, rejected"
        ),
    }
    outcome
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use presence_db::{ClosedSession, DbError, MemoryStore};
    use presence_types::{EntityId, OpenSession, Session, SessionId};

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn badge(raw: &str) -> BadgeId {
        BadgeId::parse(raw).unwrap()
    }

    async fn ledger_with(badges: &[&str]) -> (SessionLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for raw in badges {
            store
                .register_entity(badge(raw), &format!("Student {raw}"), None)
                .await
                .unwrap();
        }
        let ledger = SessionLedger::new(store.clone(), store.clone());
        (ledger, store)
    }

    // -----------------------------------------------------------------------
    // Entry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn entry_opens_session() {
        let (ledger, store) = ledger_with(&["E"]).await;
        let outcome = ledger.record_entry(&badge("E"), at(9, 0)).await.unwrap();
        assert!(matches!(outcome, Outcome::Opened { entry_time, .. } if entry_time == at(9, 0)));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn double_entry_is_already_present() {
        let (ledger, store) = ledger_with(&["E"]).await;
        let first = ledger.record_entry(&badge("E"), at(9, 0)).await.unwrap();
        let second = ledger.record_entry(&badge("E"), at(9, 1)).await.unwrap();

        assert!(matches!(first, Outcome::Opened { .. }));
        assert!(matches!(second, Outcome::AlreadyPresent { .. }));
        assert_eq!(store.session_count().await, 1);

        let open = store.list_open_sessions().await.unwrap();
        assert_eq!(open[0].entry_time, at(9, 0), "existing session untouched");
    }

    #[tokio::test]
    async fn unknown_badge_on_entry() {
        let (ledger, store) = ledger_with(&["E"]).await;
        let outcome = ledger.record_entry(&badge("NOBODY"), at(9, 0)).await.unwrap();
        assert!(matches!(outcome, Outcome::EntityUnknown { .. }));
        assert_eq!(store.session_count().await, 0);
    }

    // -----------------------------------------------------------------------
    // Exit
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn exit_closes_with_exact_duration() {
        let (ledger, _) = ledger_with(&["E"]).await;
        let t0 = at(9, 0) + TimeDelta::microseconds(250);
        let t1 = at(9, 0) + TimeDelta::microseconds(251);

        ledger.record_entry(&badge("E"), t0).await.unwrap();
        let outcome = ledger.record_exit(&badge("E"), t1).await.unwrap();

        let Outcome::Closed { duration, entry_time, exit_time, .. } = outcome else {
            panic!("expected Closed, got {outcome:?}");
        };
        assert_eq!(entry_time, t0);
        assert_eq!(exit_time, t1);
        assert_eq!(duration.as_delta(), t1 - t0);
    }

    #[tokio::test]
    async fn exit_without_entry_is_not_present() {
        let (ledger, store) = ledger_with(&["F"]).await;
        let outcome = ledger.record_exit(&badge("F"), at(17, 0)).await.unwrap();
        assert!(matches!(outcome, Outcome::NotPresent { .. }));
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn second_exit_is_not_present() {
        let (ledger, store) = ledger_with(&["E"]).await;
        ledger.record_entry(&badge("E"), at(9, 0)).await.unwrap();
        ledger.record_exit(&badge("E"), at(10, 0)).await.unwrap();
        let again = ledger.record_exit(&badge("E"), at(11, 0)).await.unwrap();

        assert!(matches!(again, Outcome::NotPresent { .. }));
        let sessions = store
            .list_sessions_for_entity(entity_of(&ledger, "E").await)
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].exit_time, Some(at(10, 0)));
    }

    #[tokio::test]
    async fn backdated_exit_is_invalid_timing() {
        let (ledger, store) = ledger_with(&["E"]).await;
        ledger.record_entry(&badge("E"), at(9, 0)).await.unwrap();

        let same = ledger.record_exit(&badge("E"), at(9, 0)).await.unwrap();
        let before = ledger.record_exit(&badge("E"), at(8, 0)).await.unwrap();
        assert!(matches!(same, Outcome::InvalidTiming { .. }));
        assert!(matches!(
            before,
            Outcome::InvalidTiming { entry_time, attempted_exit, .. }
                if entry_time == at(9, 0) && attempted_exit == at(8, 0)
        ));

        // The session is still open and can be closed properly.
        assert_eq!(store.list_open_sessions().await.unwrap().len(), 1);
        let closed = ledger.record_exit(&badge("E"), at(9, 1)).await.unwrap();
        assert!(matches!(closed, Outcome::Closed { .. }));
    }

    #[tokio::test]
    async fn sub_microsecond_exit_is_invalid_timing() {
        let (ledger, _) = ledger_with(&["E"]).await;
        let t0 = at(9, 0);
        ledger.record_entry(&badge("E"), t0).await.unwrap();
        let outcome = ledger
            .record_exit(&badge("E"), t0 + TimeDelta::nanoseconds(500))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::InvalidTiming { .. }));
    }

    #[tokio::test]
    async fn unknown_badge_on_exit() {
        let (ledger, _) = ledger_with(&[]).await;
        let outcome = ledger.record_exit(&badge("GHOST"), at(9, 0)).await.unwrap();
        assert!(matches!(outcome, Outcome::EntityUnknown { .. }));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    async fn entity_of(ledger: &SessionLedger, raw: &str) -> EntityId {
        ledger.find_entity(&badge(raw)).await.unwrap().unwrap().id
    }

    /// Every sequence of six events over two entities keeps at most one open
    /// session per entity and matches the ABSENT/PRESENT state machine.
    #[tokio::test]
    async fn at_most_one_open_session_under_every_short_sequence() {
        const EVENTS: u32 = 6;
        let total = 4_u32.pow(EVENTS);

        for mut code in 0..total {
            let (ledger, store) = ledger_with(&["A", "B"]).await;
            let mut present = [false, false];

            for step in 0..EVENTS {
                let op = code % 4;
                code /= 4;
                let who = usize::try_from(op / 2).unwrap();
                let raw = if who == 0 { "A" } else { "B" };
                let t = at(8, 0) + TimeDelta::minutes(i64::from(step + 1));

                let outcome = if op % 2 == 0 {
                    ledger.record_entry(&badge(raw), t).await.unwrap()
                } else {
                    ledger.record_exit(&badge(raw), t).await.unwrap()
                };

                match (op % 2 == 0, present[who], &outcome) {
                    (true, false, Outcome::Opened { .. }) => present[who] = true,
                    (true, true, Outcome::AlreadyPresent { .. })
                    | (false, false, Outcome::NotPresent { .. }) => {}
                    (false, true, Outcome::Closed { .. }) => present[who] = false,
                    other => panic!("unexpected transition {other:?}"),
                }

                let open = store.list_open_sessions().await.unwrap();
                let distinct: HashSet<EntityId> = open.iter().map(|o| o.entity.id).collect();
                assert_eq!(distinct.len(), open.len(), "entity open twice");
                assert_eq!(open.len(), present.iter().filter(|p| **p).count());
            }
        }
    }

    #[tokio::test]
    async fn concurrent_entries_open_exactly_once() {
        const CALLERS: usize = 64;
        let (ledger, store) = ledger_with(&["X"]).await;

        let outcomes = futures::future::join_all((0..CALLERS).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let t = at(9, 0) + TimeDelta::milliseconds(i64::try_from(i).unwrap());
                ledger.record_entry(&badge("X"), t).await
            })
        }))
        .await;

        let mut opened = 0_usize;
        let mut already = 0_usize;
        for outcome in outcomes {
            match outcome.unwrap().unwrap() {
                Outcome::Opened { .. } => opened += 1,
                Outcome::AlreadyPresent { .. } => already += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(already, CALLERS - 1);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_entry_and_exit_never_leave_two_open() {
        let (ledger, store) = ledger_with(&["X"]).await;
        ledger.record_entry(&badge("X"), at(9, 0)).await.unwrap();

        let exit = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.record_exit(&badge("X"), at(10, 0)).await })
        };
        let entry = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.record_entry(&badge("X"), at(10, 1)).await })
        };
        let exit = exit.await.unwrap().unwrap();
        let entry = entry.await.unwrap().unwrap();

        assert!(matches!(exit, Outcome::Closed { .. }));
        let open = store.list_open_sessions().await.unwrap();
        match entry {
            Outcome::Opened { .. } => assert_eq!(open.len(), 1),
            Outcome::AlreadyPresent { .. } => assert!(open.is_empty()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Store failures
    // -----------------------------------------------------------------------

    /// A store whose every operation either fails or never completes.
    struct BrokenStore {
        hang: bool,
    }

    impl BrokenStore {
        async fn fail<T>(&self) -> Result<T, DbError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(DbError::Config("connection refused".to_owned()))
        }
    }

    #[async_trait]
    impl EntityDirectory for BrokenStore {
        async fn resolve(&self, _badge_id: &BadgeId) -> Result<Option<Entity>, DbError> {
            self.fail().await
        }
    }

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn open_session(
            &self,
            _entity_id: EntityId,
            _at: DateTime<Utc>,
        ) -> Result<SessionId, StoreError> {
            Ok(self.fail().await?)
        }

        async fn close_latest_open_session(
            &self,
            _entity_id: EntityId,
            _at: DateTime<Utc>,
        ) -> Result<ClosedSession, StoreError> {
            Ok(self.fail().await?)
        }

        async fn list_open_sessions(&self) -> Result<Vec<OpenSession>, DbError> {
            self.fail().await
        }

        async fn list_sessions_for_entity(
            &self,
            _entity_id: EntityId,
        ) -> Result<Vec<Session>, DbError> {
            self.fail().await
        }

        async fn list_all_sessions(&self) -> Result<Vec<(Entity, Session)>, DbError> {
            self.fail().await
        }
    }

    #[tokio::test]
    async fn failing_directory_is_store_unavailable() {
        let broken = Arc::new(BrokenStore { hang: false });
        let ledger = SessionLedger::new(broken.clone(), broken);
        let result = ledger.record_entry(&badge("E"), at(9, 0)).await;
        assert!(matches!(
            result,
            Err(LedgerError::StoreUnavailable { operation: "find_entity", .. })
        ));
    }

    #[tokio::test]
    async fn failing_store_is_store_unavailable() {
        let directory = Arc::new(MemoryStore::new());
        directory
            .register_entity(badge("E"), "Eve", None)
            .await
            .unwrap();
        let ledger = SessionLedger::new(directory, Arc::new(BrokenStore { hang: false }));

        let entry = ledger.record_entry(&badge("E"), at(9, 0)).await;
        let exit = ledger.record_exit(&badge("E"), at(10, 0)).await;
        assert!(matches!(
            entry,
            Err(LedgerError::StoreUnavailable { operation: "open_session", .. })
        ));
        assert!(matches!(
            exit,
            Err(LedgerError::StoreUnavailable { operation: "close_latest_open_session", .. })
        ));
    }

    #[tokio::test]
    async fn hanging_store_times_out() {
        let directory = Arc::new(MemoryStore::new());
        directory
            .register_entity(badge("E"), "Eve", None)
            .await
            .unwrap();
        let ledger = SessionLedger::new(directory, Arc::new(BrokenStore { hang: true }))
            .with_timeout(Duration::from_millis(20));

        let result = ledger.record_entry(&badge("E"), at(9, 0)).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable { .. })));
    }
}
