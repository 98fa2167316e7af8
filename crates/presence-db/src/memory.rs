//! In-memory entity directory and session store.
//!
//! All state sits behind one [`RwLock`], so every mutation is a single
//! critical section and every listing is taken from one consistent
//! snapshot. The `open` index maps each present entity to its open
//! session; it is the in-memory counterpart of the partial unique index.
//!
//! Suitable for tests and single-process deployments. Multiple processes
//! cannot share it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use presence_types::{
    BadgeId, Entity, EntityId, OpenSession, Session, SessionDuration, SessionId,
};
use tokio::sync::RwLock;

use crate::error::DbError;
use crate::store::{ClosedSession, EntityDirectory, SessionStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    entities: HashMap<EntityId, Entity>,
    badges: HashMap<BadgeId, EntityId>,
    /// Append-only; positions never move.
    sessions: Vec<Session>,
    /// Entity to position of its open session in `sessions`.
    open: HashMap<EntityId, usize>,
}

/// Entity directory and session store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity so its badge resolves.
    ///
    /// This is the directory owner's operation (seeding from configuration
    /// or test setup); the ledger never calls it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::DuplicateBadge`] if the badge is already taken.
    pub async fn register_entity(
        &self,
        badge_id: BadgeId,
        name: &str,
        department: Option<&str>,
    ) -> Result<Entity, DbError> {
        let mut state = self.state.write().await;
        if state.badges.contains_key(&badge_id) {
            return Err(DbError::DuplicateBadge(badge_id.to_string()));
        }

        let entity = Entity {
            id: EntityId::new(),
            badge_id: badge_id.clone(),
            name: name.to_owned(),
            department: department.map(str::to_owned),
        };
        state.badges.insert(badge_id, entity.id);
        state.entities.insert(entity.id, entity.clone());

        tracing::debug!(entity_id = %entity.id, badge = %entity.badge_id, "Registered entity");
        Ok(entity)
    }

    /// Number of sessions ever recorded, open or closed.
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait]
impl EntityDirectory for MemoryStore {
    async fn resolve(&self, badge_id: &BadgeId) -> Result<Option<Entity>, DbError> {
        let state = self.state.read().await;
        Ok(state
            .badges
            .get(badge_id)
            .and_then(|id| state.entities.get(id))
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn open_session(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<SessionId, StoreError> {
        let mut state = self.state.write().await;
        if state.open.contains_key(&entity_id) {
            return Err(StoreError::Conflict { entity_id });
        }

        let session = Session::open(entity_id, at);
        let session_id = session.id;
        let position = state.sessions.len();
        state.sessions.push(session);
        state.open.insert(entity_id, position);

        tracing::debug!(%entity_id, %session_id, "Opened session");
        Ok(session_id)
    }

    async fn close_latest_open_session(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> Result<ClosedSession, StoreError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(&position) = state.open.get(&entity_id) else {
            return Err(StoreError::NoOpenSession { entity_id });
        };

        let Some(session) = state.sessions.get_mut(position).filter(|s| s.is_open()) else {
            tracing::error!(
                %entity_id,
                position,
                "Consistency violation: open index points at a missing or closed session"
            );
            state.open.remove(&entity_id);
            return Err(StoreError::NoOpenSession { entity_id });
        };

        let Some(duration) = SessionDuration::between(session.entry_time, at) else {
            return Err(StoreError::NonPositiveDuration {
                session_id: session.id,
                entry_time: session.entry_time,
                exit_time: at,
            });
        };

        session.exit_time = Some(at);
        session.duration = Some(duration);
        let closed = ClosedSession {
            session_id: session.id,
            entity_id,
            entry_time: session.entry_time,
            exit_time: at,
            duration,
        };
        state.open.remove(&entity_id);

        tracing::debug!(%entity_id, session_id = %closed.session_id, "Closed session");
        Ok(closed)
    }

    async fn list_open_sessions(&self) -> Result<Vec<OpenSession>, DbError> {
        let state = self.state.read().await;
        let mut open: Vec<OpenSession> = state
            .open
            .values()
            .filter_map(|&position| state.sessions.get(position))
            .filter_map(|session| {
                let entity = state.entities.get(&session.entity_id)?;
                Some(OpenSession {
                    entity: entity.clone(),
                    session_id: session.id,
                    entry_time: session.entry_time,
                })
            })
            .collect();

        open.sort_by(|a, b| {
            a.entry_time
                .cmp(&b.entry_time)
                .then(a.session_id.cmp(&b.session_id))
        });
        Ok(open)
    }

    async fn list_sessions_for_entity(&self, entity_id: EntityId) -> Result<Vec<Session>, DbError> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .iter()
            .filter(|s| s.entity_id == entity_id)
            .cloned()
            .collect();

        sessions.sort_by(|a, b| most_recent_first(a, b));
        Ok(sessions)
    }

    async fn list_all_sessions(&self) -> Result<Vec<(Entity, Session)>, DbError> {
        let state = self.state.read().await;
        let mut rows: Vec<(Entity, Session)> = state
            .sessions
            .iter()
            .filter_map(|session| {
                let entity = state.entities.get(&session.entity_id)?;
                Some((entity.clone(), session.clone()))
            })
            .collect();

        rows.sort_by(|(_, a), (_, b)| most_recent_first(a, b));
        Ok(rows)
    }
}

fn most_recent_first(a: &Session, b: &Session) -> std::cmp::Ordering {
    b.entry_time.cmp(&a.entry_time).then(b.id.cmp(&a.id))
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
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    async fn store_with(badge: &str) -> (MemoryStore, Entity) {
        let store = MemoryStore::new();
        let entity = store
            .register_entity(BadgeId::parse(badge).unwrap(), "Ada", Some("Physics"))
            .await
            .unwrap();
        (store, entity)
    }

    #[tokio::test]
    async fn resolve_known_and_unknown_badges() {
        let (store, entity) = store_with("B-1").await;
        let found = store.resolve(&BadgeId::parse("B-1").unwrap()).await.unwrap();
        assert_eq!(found, Some(entity));
        let missing = store.resolve(&BadgeId::parse("B-2").unwrap()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_badge_is_rejected() {
        let (store, _) = store_with("B-1").await;
        let again = store
            .register_entity(BadgeId::parse("B-1").unwrap(), "Other", None)
            .await;
        assert!(matches!(again, Err(DbError::DuplicateBadge(_))));
    }

    #[tokio::test]
    async fn second_open_conflicts() {
        let (store, entity) = store_with("B-1").await;
        store.open_session(entity.id, at(9, 0)).await.unwrap();
        let second = store.open_session(entity.id, at(9, 5)).await;
        assert!(matches!(second, Err(StoreError::Conflict { .. })));
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn close_records_exact_duration() {
        let (store, entity) = store_with("B-1").await;
        let opened = store.open_session(entity.id, at(9, 0)).await.unwrap();
        let closed = store
            .close_latest_open_session(entity.id, at(17, 30))
            .await
            .unwrap();
        assert_eq!(closed.session_id, opened);
        assert_eq!(closed.duration.as_delta(), TimeDelta::minutes(510));

        let sessions = store.list_sessions_for_entity(entity.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].exit_time, Some(at(17, 30)));
        assert_eq!(sessions[0].duration, Some(closed.duration));
    }

    #[tokio::test]
    async fn close_without_open_session() {
        let (store, entity) = store_with("B-1").await;
        let result = store.close_latest_open_session(entity.id, at(9, 0)).await;
        assert!(matches!(result, Err(StoreError::NoOpenSession { .. })));
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn non_positive_duration_leaves_session_open() {
        let (store, entity) = store_with("B-1").await;
        store.open_session(entity.id, at(9, 0)).await.unwrap();

        let same = store.close_latest_open_session(entity.id, at(9, 0)).await;
        assert!(matches!(same, Err(StoreError::NonPositiveDuration { .. })));
        let earlier = store.close_latest_open_session(entity.id, at(8, 0)).await;
        assert!(matches!(earlier, Err(StoreError::NonPositiveDuration { .. })));

        let open = store.list_open_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].entry_time, at(9, 0));
    }

    #[tokio::test]
    async fn reopen_after_close_appends() {
        let (store, entity) = store_with("B-1").await;
        store.open_session(entity.id, at(9, 0)).await.unwrap();
        store.close_latest_open_session(entity.id, at(10, 0)).await.unwrap();
        store.open_session(entity.id, at(11, 0)).await.unwrap();

        let sessions = store.list_sessions_for_entity(entity.id).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].entry_time, at(11, 0));
        assert!(sessions[0].is_open());
        assert_eq!(sessions[1].entry_time, at(9, 0));
        assert!(!sessions[1].is_open());
    }

    #[tokio::test]
    async fn listings_are_ordered() {
        let store = MemoryStore::new();
        let mut entities = Vec::new();
        for (badge, name) in [("B-1", "Ada"), ("B-2", "Grace"), ("B-3", "Edsger")] {
            entities.push(
                store
                    .register_entity(BadgeId::parse(badge).unwrap(), name, None)
                    .await
                    .unwrap(),
            );
        }
        store.open_session(entities[1].id, at(8, 0)).await.unwrap();
        store.open_session(entities[0].id, at(9, 0)).await.unwrap();
        store.open_session(entities[2].id, at(7, 0)).await.unwrap();
        store.close_latest_open_session(entities[2].id, at(7, 30)).await.unwrap();

        let open = store.list_open_sessions().await.unwrap();
        let names: Vec<&str> = open.iter().map(|o| o.entity.name.as_str()).collect();
        assert_eq!(names, ["Grace", "Ada"]);

        let all = store.list_all_sessions().await.unwrap();
        let names: Vec<&str> = all.iter().map(|(e, _)| e.name.as_str()).collect();
        assert_eq!(names, ["Ada", "Grace", "Edsger"]);
    }

    #[tokio::test]
    async fn concurrent_opens_admit_exactly_one() {
        let (store, entity) = store_with("B-1").await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for minute in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.open_session(entity.id, at(9, minute)).await
            }));
        }

        let mut opened = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => opened += 1,
                Err(StoreError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected store error: {e}"),
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(conflicts, 31);
        assert_eq!(store.list_open_sessions().await.unwrap().len(), 1);
    }
}
