//! Domain records and read projections.
//!
//! [`Entity`] and [`Session`] are the stored records. [`OpenSession`] is the
//! row shape of the occupancy listing. [`OccupancyEntry`], [`HistoryEntry`]
//! and [`EntityHistoryEntry`] are the serializable projections handed to
//! API clients.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{BadgeId, EntityId, SessionId};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A tracked entity as resolved by the Entity Directory.
///
/// The ledger only ever reads entities; creation and removal belong to the
/// directory's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Internal identifier.
    pub id: EntityId,
    /// The badge that resolves to this entity.
    pub badge_id: BadgeId,
    /// Display name.
    pub name: String,
    /// Department or group, if recorded.
    pub department: Option<String>,
}

// ---------------------------------------------------------------------------
// Session duration
// ---------------------------------------------------------------------------

/// Length of a closed session.
///
/// Only constructible from an (entry, exit) pair with exit strictly after
/// entry, so a `SessionDuration` is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionDuration(TimeDelta);

impl SessionDuration {
    /// Compute the duration between `entry` and `exit`.
    ///
    /// Returns `None` unless `exit` is strictly after `entry`.
    pub fn between(entry: DateTime<Utc>, exit: DateTime<Utc>) -> Option<Self> {
        let delta = exit.signed_duration_since(entry);
        (delta > TimeDelta::zero()).then_some(Self(delta))
    }

    /// Rebuild a duration from a stored microsecond count.
    ///
    /// Returns `None` for zero or negative counts.
    pub fn from_micros(micros: i64) -> Option<Self> {
        (micros > 0).then(|| Self(TimeDelta::microseconds(micros)))
    }

    /// The duration as a [`TimeDelta`].
    pub const fn as_delta(self) -> TimeDelta {
        self.0
    }

    /// Whole microseconds, or `None` if the span overflows an `i64`.
    pub fn as_micros(self) -> Option<i64> {
        self.0.num_microseconds()
    }

    /// Whole seconds, truncated toward zero.
    pub fn whole_seconds(self) -> i64 {
        self.0.num_seconds()
    }
}

impl core::fmt::Display for SessionDuration {
    /// Formats as `HH:MM:SS`; hours are not wrapped at 24.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total = self.whole_seconds();
        let hours = total.div_euclid(3600);
        let minutes = total.rem_euclid(3600).div_euclid(60);
        let seconds = total.rem_euclid(60);
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One continuous presence interval of one entity.
///
/// `exit_time` and `duration` are either both absent (the session is open)
/// or both present with `duration == exit_time - entry_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Owning entity.
    pub entity_id: EntityId,
    /// When the entity entered.
    pub entry_time: DateTime<Utc>,
    /// When the entity left; `None` while the session is open.
    pub exit_time: Option<DateTime<Utc>>,
    /// Length of the session; `None` while the session is open.
    pub duration: Option<SessionDuration>,
}

impl Session {
    /// Start a new open session.
    pub fn open(entity_id: EntityId, entry_time: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            entity_id,
            entry_time,
            exit_time: None,
            duration: None,
        }
    }

    /// Whether the session has no exit yet.
    pub const fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }
}

/// A row of the occupancy listing: an open session with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    /// The entity that is present.
    pub entity: Entity,
    /// The open session.
    pub session_id: SessionId,
    /// When the entity entered.
    pub entry_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// An entity currently present in the facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OccupancyEntry {
    /// Badge of the present entity.
    pub badge_id: BadgeId,
    /// Internal entity identifier.
    pub entity_id: EntityId,
    /// Display name.
    pub name: String,
    /// Department, if recorded.
    pub department: Option<String>,
    /// The open session.
    pub session_id: SessionId,
    /// When the entity entered.
    pub entry_time: DateTime<Utc>,
}

impl From<OpenSession> for OccupancyEntry {
    fn from(open: OpenSession) -> Self {
        Self {
            badge_id: open.entity.badge_id,
            entity_id: open.entity.id,
            name: open.entity.name,
            department: open.entity.department,
            session_id: open.session_id,
            entry_time: open.entry_time,
        }
    }
}

/// One session in an entity's own history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HistoryEntry {
    /// Session identifier.
    pub session_id: SessionId,
    /// When the entity entered.
    pub entry_time: DateTime<Utc>,
    /// When the entity left; null while the session is open.
    pub exit_time: Option<DateTime<Utc>>,
    /// Whole seconds present; null while the session is open.
    pub duration_seconds: Option<i64>,
    /// `HH:MM:SS` text of the duration; null while the session is open.
    pub duration: Option<String>,
}

impl From<&Session> for HistoryEntry {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            entry_time: session.entry_time,
            exit_time: session.exit_time,
            duration_seconds: session.duration.map(SessionDuration::whole_seconds),
            duration: session.duration.map(|d| d.to_string()),
        }
    }
}

/// One session in the facility-wide history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EntityHistoryEntry {
    /// Badge of the session's owner.
    pub badge_id: BadgeId,
    /// Internal entity identifier.
    pub entity_id: EntityId,
    /// Display name of the owner.
    pub name: String,
    /// Session identifier.
    pub session_id: SessionId,
    /// When the entity entered.
    pub entry_time: DateTime<Utc>,
    /// When the entity left; null while the session is open.
    pub exit_time: Option<DateTime<Utc>>,
    /// Whole seconds present; null while the session is open.
    pub duration_seconds: Option<i64>,
    /// `HH:MM:SS` text of the duration; null while the session is open.
    pub duration: Option<String>,
}

impl From<(Entity, Session)> for EntityHistoryEntry {
    fn from((entity, session): (Entity, Session)) -> Self {
        let row = HistoryEntry::from(&session);
        Self {
            badge_id: entity.badge_id,
            entity_id: entity.id,
            name: entity.name,
            session_id: row.session_id,
            entry_time: row.entry_time,
            exit_time: row.exit_time,
            duration_seconds: row.duration_seconds,
            duration: row.duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn duration_requires_exit_after_entry() {
        assert!(SessionDuration::between(at(9, 0), at(9, 0)).is_none());
        assert!(SessionDuration::between(at(9, 0), at(8, 59)).is_none());
        assert!(SessionDuration::between(at(9, 0), at(9, 1)).is_some());
    }

    #[test]
    fn duration_text_is_hours_minutes_seconds() {
        let d = SessionDuration::between(at(9, 0), at(17, 30));
        assert_eq!(d.map(|d| d.to_string()).as_deref(), Some("08:30:00"));
        assert_eq!(d.map(SessionDuration::whole_seconds), Some(30_600));
    }

    #[test]
    fn duration_text_does_not_wrap_past_a_day() {
        let d = SessionDuration::from_micros(26 * 3600 * 1_000_000 + 5_000_000);
        assert_eq!(d.map(|d| d.to_string()).as_deref(), Some("26:00:05"));
    }

    #[test]
    fn micros_round_trip() {
        let d = SessionDuration::between(at(9, 0), at(9, 1));
        let micros = d.and_then(SessionDuration::as_micros);
        assert_eq!(micros, Some(60_000_000));
        assert_eq!(micros.and_then(SessionDuration::from_micros), d);
        assert!(SessionDuration::from_micros(0).is_none());
    }

    #[test]
    fn open_session_projects_without_placeholders() {
        let session = Session::open(EntityId::new(), at(9, 0));
        let row = HistoryEntry::from(&session);
        assert!(session.is_open());
        assert!(row.exit_time.is_none());
        assert!(row.duration_seconds.is_none());
        assert!(row.duration.is_none());
    }
}
