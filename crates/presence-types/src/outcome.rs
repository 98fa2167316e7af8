//! The caller-facing result of a scan event.
//!
//! Every entry or exit event yields exactly one [`Outcome`]. Rejections are
//! ordinary values, not errors: only infrastructure failure is reported
//! through the ledger's error type.

use chrono::{DateTime, Utc};

use crate::ids::{BadgeId, EntityId, SessionId};
use crate::structs::SessionDuration;

/// Result of processing one entry or exit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new session was opened.
    Opened {
        /// The scanned badge.
        badge_id: BadgeId,
        /// The entity that entered.
        entity_id: EntityId,
        /// The newly created session.
        session_id: SessionId,
        /// Recorded entry time.
        entry_time: DateTime<Utc>,
    },

    /// The entity's open session was closed.
    Closed {
        /// The scanned badge.
        badge_id: BadgeId,
        /// The entity that left.
        entity_id: EntityId,
        /// The session that was closed.
        session_id: SessionId,
        /// Entry time of the closed session.
        entry_time: DateTime<Utc>,
        /// Recorded exit time.
        exit_time: DateTime<Utc>,
        /// `exit_time - entry_time`.
        duration: SessionDuration,
    },

    /// The badge does not resolve to any entity.
    EntityUnknown {
        /// The scanned badge.
        badge_id: BadgeId,
    },

    /// Entry rejected: the entity already has an open session.
    AlreadyPresent {
        /// The scanned badge.
        badge_id: BadgeId,
        /// The entity that is already present.
        entity_id: EntityId,
    },

    /// Exit rejected: the entity has no open session.
    NotPresent {
        /// The scanned badge.
        badge_id: BadgeId,
        /// The entity that is not present.
        entity_id: EntityId,
    },

    /// Exit rejected: the exit time is not after the session's entry time.
    InvalidTiming {
        /// The scanned badge.
        badge_id: BadgeId,
        /// The entity whose exit was rejected.
        entity_id: EntityId,
        /// The open session, left untouched.
        session_id: SessionId,
        /// Entry time of the open session.
        entry_time: DateTime<Utc>,
        /// The rejected exit time.
        attempted_exit: DateTime<Utc>,
    },
}

impl Outcome {
    /// Whether the event changed the entity's presence state.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Opened { .. } | Self::Closed { .. })
    }

    /// Stable `snake_case` name of the variant, used in logs and responses.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "opened",
            Self::Closed { .. } => "closed",
            Self::EntityUnknown { .. } => "entity_unknown",
            Self::AlreadyPresent { .. } => "already_present",
            Self::NotPresent { .. } => "not_present",
            Self::InvalidTiming { .. } => "invalid_timing",
        }
    }

    /// The badge the event was scanned with.
    pub const fn badge_id(&self) -> &BadgeId {
        match self {
            Self::Opened { badge_id, .. }
            | Self::Closed { badge_id, .. }
            | Self::EntityUnknown { badge_id }
            | Self::AlreadyPresent { badge_id, .. }
            | Self::NotPresent { badge_id, .. }
            | Self::InvalidTiming { badge_id, .. } => badge_id,
        }
    }
}
