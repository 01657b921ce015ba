//! Room records and the one place call duration is computed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{RoomId, UserId};
use crate::core::kinds::{GenderFilter, Level, PartnerKind, RoomStatus};

/// A persisted communication session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// First participant; always present.
    pub participant_a: UserId,
    /// Second participant; absent when the partner is the AI coach.
    pub participant_b: Option<UserId>,
    /// Human or AI partner.
    pub partner_kind: PartnerKind,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Gender filter used at search time.
    pub gender_filter: GenderFilter,
    /// Level used at search time.
    pub level: Level,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// When both sides were connected.
    pub connected_at: Option<DateTime<Utc>>,
    /// Close time.
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds of call time, set once on close.
    pub duration_seconds: Option<u64>,
}

/// Fields written when a room closes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RoomClosing {
    /// Close time.
    pub ended_at: DateTime<Utc>,
    /// Computed duration.
    pub duration_seconds: u64,
}

impl Room {
    /// Whether `user` is one of the room's participants.
    #[must_use]
    pub fn is_participant(&self, user: UserId) -> bool {
        self.participant_a == user || self.participant_b == Some(user)
    }

    /// The other participant, `None` for AI rooms.
    #[must_use]
    pub fn partner_of(&self, user: UserId) -> Option<UserId> {
        if self.participant_a == user {
            self.participant_b
        } else {
            Some(self.participant_a)
        }
    }

    /// Whether the call is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }

    /// Closing values for a close at `now`, or `None` if the room is not
    /// active. Duration runs from `connected_at` (else `started_at`).
    #[must_use]
    pub fn close_at(&self, now: DateTime<Utc>) -> Option<RoomClosing> {
        if !self.is_active() {
            return None;
        }
        let from = self.connected_at.unwrap_or(self.started_at);
        Some(RoomClosing {
            ended_at: now,
            duration_seconds: whole_seconds_between(from, now),
        })
    }

    /// Apply a closing computed by `close_at`.
    pub fn apply_closing(&mut self, closing: RoomClosing) {
        self.status = RoomStatus::Ended;
        self.ended_at = Some(closing.ended_at);
        self.duration_seconds = Some(closing.duration_seconds);
    }
}

/// Truncated whole seconds from `from` to `to`, never negative.
#[must_use]
pub fn whole_seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}

/// `m:ss` rendering used by history listings.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
