//! Queue entries and search criteria.

use chrono::{DateTime, Utc};

use crate::core::ids::UserId;
use crate::core::kinds::{GenderFilter, Level};
use crate::protocol::handle::PeerHandle;
use crate::protocol::messages::PartnerInfo;

/// What a searching user asked for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SearchCriteria {
    /// Partner gender preference.
    pub gender_filter: GenderFilter,
    /// Partner level preference.
    pub level: Level,
}

impl SearchCriteria {
    /// Build criteria.
    #[must_use]
    pub const fn new(gender_filter: GenderFilter, level: Level) -> Self {
        Self {
            gender_filter,
            level,
        }
    }

    /// Candidate compatibility.
    ///
    /// Level must be `any` on either side or equal. The gender filter only
    /// takes part when `enforce_gender` is set.
    #[must_use]
    pub fn compatible_with(&self, other: &Self, enforce_gender: bool) -> bool {
        if !self.level.compatible_with(other.level) {
            return false;
        }
        !enforce_gender || self.gender_filter.compatible_with(other.gender_filter)
    }
}

/// One user waiting for a partner.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    /// Waiting user.
    pub user_id: UserId,
    /// Connection to notify on match.
    pub handle: PeerHandle,
    /// Requested criteria.
    pub criteria: SearchCriteria,
    /// Name shown to the partner.
    pub display_name: String,
    /// Login name shown to the partner.
    pub username: String,
    /// Last time this entry was written.
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn new(
        handle: PeerHandle,
        criteria: SearchCriteria,
        display_name: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            user_id: handle.user_id(),
            handle,
            criteria,
            display_name: display_name.into(),
            username: username.into(),
            enqueued_at: Utc::now(),
        }
    }

    /// Partner summary for the other side's `matched` message.
    #[must_use]
    pub fn partner_info(&self) -> PartnerInfo {
        PartnerInfo {
            name: self.display_name.clone(),
            username: self.username.clone(),
        }
    }
}

/// Result of inserting into the queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnqueueOutcome {
    /// No previous entry for the user.
    Inserted,
    /// An existing entry was replaced in place.
    Replaced,
}

/// Result of the atomic check-and-remove.
#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    /// Both entries were removed; the caller owns the pairing.
    Matched {
        /// The claiming user's own entry.
        own: QueueEntry,
        /// The first compatible candidate.
        partner: QueueEntry,
        /// The partner was queued ahead of the claiming user.
        partner_first: bool,
    },
    /// Still queued; nobody compatible is waiting.
    NoCandidate,
    /// The claiming user's entry is gone (consumed by a concurrent match or
    /// cancelled).
    NotQueued,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_only_by_default() {
        let a = SearchCriteria::new(GenderFilter::Male, Level::Intermediate);
        let b = SearchCriteria::new(GenderFilter::Female, Level::Intermediate);
        assert!(a.compatible_with(&b, false));
        assert!(!a.compatible_with(&b, true));
    }

    #[test]
    fn test_level_mismatch_never_matches() {
        let a = SearchCriteria::new(GenderFilter::Any, Level::Beginner);
        let b = SearchCriteria::new(GenderFilter::Any, Level::Advanced);
        assert!(!a.compatible_with(&b, false));
        let any = SearchCriteria::new(GenderFilter::Any, Level::Any);
        assert!(a.compatible_with(&any, true));
    }
}
