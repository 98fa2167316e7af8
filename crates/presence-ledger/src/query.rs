//! Read-side projections over the session store.
//!
//! Queries never write. Each one is a single store listing mapped into the
//! serializable views from `presence_types`, so results reflect some
//! committed state and never a half-applied operation.

use std::sync::Arc;
use std::time::Duration;

use presence_db::{EntityDirectory, SessionStore};
use presence_types::{BadgeId, Entity, EntityHistoryEntry, EntityId, HistoryEntry, OccupancyEntry};

use crate::deadline::{DEFAULT_OPERATION_TIMEOUT, within};
use crate::error::LedgerError;

/// Occupancy and history queries.
#[derive(Clone)]
pub struct PresenceQuery {
    directory: Arc<dyn EntityDirectory>,
    store: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl PresenceQuery {
    /// Create a query layer over the given directory and session store.
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

    /// Resolve a badge to its entity.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on directory failure.
    pub async fn resolve(&self, badge_id: &BadgeId) -> Result<Option<Entity>, LedgerError> {
        within(self.timeout, "find_entity", self.directory.resolve(badge_id))
            .await?
            .map_err(|e| LedgerError::unavailable("find_entity", &e))
    }

    /// Everyone currently present, earliest arrival first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on store failure.
    pub async fn current_occupancy(&self) -> Result<Vec<OccupancyEntry>, LedgerError> {
        let open = within(
            self.timeout,
            "list_open_sessions",
            self.store.list_open_sessions(),
        )
        .await?
        .map_err(|e| LedgerError::unavailable("list_open_sessions", &e))?;

        Ok(open.into_iter().map(OccupancyEntry::from).collect())
    }

    /// All sessions of one entity, most recent first. An entity with no
    /// sessions yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on store failure.
    pub async fn history_for(&self, entity_id: EntityId) -> Result<Vec<HistoryEntry>, LedgerError> {
        let sessions = within(
            self.timeout,
            "list_sessions_for_entity",
            self.store.list_sessions_for_entity(entity_id),
        )
        .await?
        .map_err(|e| LedgerError::unavailable("list_sessions_for_entity", &e))?;

        Ok(sessions.iter().map(HistoryEntry::from).collect())
    }

    /// History for a badge, or `None` if the badge is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on store failure.
    pub async fn history_for_badge(
        &self,
        badge_id: &BadgeId,
    ) -> Result<Option<(Entity, Vec<HistoryEntry>)>, LedgerError> {
        let Some(entity) = self.resolve(badge_id).await? else {
            return Ok(None);
        };
        let history = self.history_for(entity.id).await?;
        Ok(Some((entity, history)))
    }

    /// Every session of every entity, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] on store failure.
    pub async fn full_history(&self) -> Result<Vec<EntityHistoryEntry>, LedgerError> {
        let all = within(
            self.timeout,
            "list_all_sessions",
            self.store.list_all_sessions(),
        )
        .await?
        .map_err(|e| LedgerError::unavailable("list_all_sessions", &e))?;

        Ok(all.into_iter().map(EntityHistoryEntry::from).collect())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use presence_db::{ClosedSession, DbError, MemoryStore, StoreError};
    use presence_types::{OpenSession, Session, SessionId};

    use super::*;
    use crate::SessionLedger;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn badge(raw: &str) -> BadgeId {
        BadgeId::parse(raw).unwrap()
    }

    async fn setup(badges: &[(&str, &str)]) -> (SessionLedger, PresenceQuery) {
        let store = Arc::new(MemoryStore::new());
        for (raw, name) in badges {
            store
                .register_entity(badge(raw), name, Some("Physics"))
                .await
                .unwrap();
        }
        (
            SessionLedger::new(store.clone(), store.clone()),
            PresenceQuery::new(store.clone(), store),
        )
    }

    #[tokio::test]
    async fn occupancy_tracks_a_day_of_scans() {
        let (ledger, query) = setup(&[("E", "Eve"), ("F", "Finn")]).await;

        ledger.record_entry(&badge("E"), at(9, 0)).await.unwrap();
        ledger.record_entry(&badge("F"), at(9, 5)).await.unwrap();
        let both = query.current_occupancy().await.unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].name, "Eve");
        assert_eq!(both[1].name, "Finn");
        assert_eq!(both[0].department.as_deref(), Some("Physics"));

        ledger.record_exit(&badge("E"), at(10, 0)).await.unwrap();
        let one = query.current_occupancy().await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].badge_id, badge("F"));
        assert_eq!(one[0].entry_time, at(9, 5));
    }

    #[tokio::test]
    async fn history_lists_visits_newest_first() {
        let (ledger, query) = setup(&[("E", "Eve")]).await;
        let e = badge("E");

        ledger.record_entry(&e, at(9, 0)).await.unwrap();
        ledger.record_exit(&e, at(10, 0)).await.unwrap();
        ledger.record_entry(&e, at(11, 0)).await.unwrap();
        ledger.record_exit(&e, at(11, 30)).await.unwrap();
        ledger.record_entry(&e, at(13, 0)).await.unwrap();

        let (entity, history) = query.history_for_badge(&e).await.unwrap().unwrap();
        assert_eq!(entity.name, "Eve");
        assert_eq!(history.len(), 3);

        assert_eq!(history[0].entry_time, at(13, 0));
        assert!(history[0].exit_time.is_none());
        assert!(history[0].duration_seconds.is_none());

        assert_eq!(history[1].duration_seconds, Some(1_800));
        assert_eq!(history[1].duration.as_deref(), Some("00:30:00"));
        assert_eq!(history[2].duration_seconds, Some(3_600));
        assert_eq!(history[2].duration.as_deref(), Some("01:00:00"));
    }

    #[tokio::test]
    async fn history_of_unknown_badge_is_none() {
        let (_, query) = setup(&[]).await;
        assert!(query.history_for_badge(&badge("GHOST")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_of_idle_entity_is_empty() {
        let (_, query) = setup(&[("E", "Eve")]).await;
        let (_, history) = query.history_for_badge(&badge("E")).await.unwrap().unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn full_history_joins_entities() {
        let (ledger, query) = setup(&[("E", "Eve"), ("F", "Finn")]).await;
        ledger.record_entry(&badge("E"), at(9, 0)).await.unwrap();
        ledger.record_entry(&badge("F"), at(9, 30)).await.unwrap();
        ledger.record_exit(&badge("E"), at(12, 0)).await.unwrap();

        let all = query.full_history().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Finn");
        assert!(all[0].exit_time.is_none());
        assert_eq!(all[1].name, "Eve");
        assert_eq!(all[1].duration.as_deref(), Some("03:00:00"));
    }

    #[tokio::test]
    async fn rejected_scans_do_not_appear_in_history() {
        let (ledger, query) = setup(&[("F", "Finn")]).await;
        ledger.record_exit(&badge("F"), at(8, 0)).await.unwrap();
        ledger.record_entry(&badge("F"), at(9, 0)).await.unwrap();
        ledger.record_entry(&badge("F"), at(9, 1)).await.unwrap();
        ledger.record_exit(&badge("F"), at(8, 30)).await.unwrap();

        let all = query.full_history().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entry_time, at(9, 0));
        assert!(all[0].exit_time.is_none());
    }

    #[tokio::test]
    async fn working_day_session_scenario() {
        let (ledger, query) = setup(&[("E", "Eve")]).await;
        let e = badge("E");

        ledger.record_entry(&e, at(9, 0)).await.unwrap();
        let during = query.current_occupancy().await.unwrap();
        assert_eq!(during.len(), 1);
        assert_eq!(during[0].badge_id, e);
        assert_eq!(during[0].entry_time, at(9, 0));

        ledger.record_exit(&e, at(17, 30)).await.unwrap();
        assert!(query.current_occupancy().await.unwrap().is_empty());

        let (_, history) = query.history_for_badge(&e).await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exit_time, Some(at(17, 30)));
        assert_eq!(history[0].duration_seconds, Some(8 * 3_600 + 30 * 60));
    }

    #[tokio::test]
    async fn exit_without_entry_leaves_views_unchanged() {
        let (ledger, query) = setup(&[("F", "Finn")]).await;
        let f = badge("F");

        let outcome = ledger.record_exit(&f, at(17, 0)).await.unwrap();
        assert!(matches!(outcome, presence_types::Outcome::NotPresent { .. }));

        assert!(query.current_occupancy().await.unwrap().is_empty());
        let (_, history) = query.history_for_badge(&f).await.unwrap().unwrap();
        assert!(history.is_empty());
        assert!(query.full_history().await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Store failures
    // -----------------------------------------------------------------------

    /// A session store whose every call fails, or never returns.
    struct UnreachableStore {
        hang: bool,
    }

    impl UnreachableStore {
        async fn fail<T>(&self) -> Result<T, DbError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(DbError::Config("connection reset".to_owned()))
        }
    }

    #[async_trait]
    impl SessionStore for UnreachableStore {
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

    async fn query_over_unreachable_store(hang: bool) -> PresenceQuery {
        let directory = Arc::new(MemoryStore::new());
        directory
            .register_entity(badge("E"), "Eve", None)
            .await
            .unwrap();
        PresenceQuery::new(directory, Arc::new(UnreachableStore { hang }))
            .with_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn failing_store_fails_every_projection() {
        let query = query_over_unreachable_store(false).await;

        assert!(matches!(
            query.current_occupancy().await,
            Err(LedgerError::StoreUnavailable { operation: "list_open_sessions", .. })
        ));
        assert!(matches!(
            query.history_for_badge(&badge("E")).await,
            Err(LedgerError::StoreUnavailable { operation: "list_sessions_for_entity", .. })
        ));
        assert!(matches!(
            query.history_for(EntityId::new()).await,
            Err(LedgerError::StoreUnavailable { operation: "list_sessions_for_entity", .. })
        ));
        assert!(matches!(
            query.full_history().await,
            Err(LedgerError::StoreUnavailable { operation: "list_all_sessions", .. })
        ));
    }

    #[tokio::test]
    async fn hanging_store_times_out_every_projection() {
        let query = query_over_unreachable_store(true).await;

        assert!(matches!(
            query.current_occupancy().await,
            Err(LedgerError::StoreUnavailable { .. })
        ));
        assert!(matches!(
            query.history_for_badge(&badge("E")).await,
            Err(LedgerError::StoreUnavailable { .. })
        ));
        assert!(matches!(
            query.full_history().await,
            Err(LedgerError::StoreUnavailable { .. })
        ));
    }
}
