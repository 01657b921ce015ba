//! Post-call ratings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::VoxError;
use crate::core::ids::{RatingId, RoomId, UserId};

/// A validated 1..=5 score.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct RatingScore(u8);

impl RatingScore {
    /// Raw score.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for RatingScore {
    type Error = VoxError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (1..=5).contains(&value) {
            u8::try_from(value)
                .map(Self)
                .map_err(|_| VoxError::InvalidRating(value))
        } else {
            Err(VoxError::InvalidRating(value))
        }
    }
}

impl From<RatingScore> for u8 {
    fn from(score: RatingScore) -> Self {
        score.0
    }
}

/// A persisted rating.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    /// Rating identifier.
    pub id: RatingId,
    /// Rated room.
    pub room_id: RoomId,
    /// Who gave the rating.
    pub rater: UserId,
    /// Who was rated; `None` for the AI partner.
    pub rated_user: Option<UserId>,
    /// Score.
    pub score: RatingScore,
    /// Free-form comment.
    pub comment: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Rating about to be written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewRating {
    /// Rated room.
    pub room_id: RoomId,
    /// Who gives the rating.
    pub rater: UserId,
    /// Who is rated.
    pub rated_user: Option<UserId>,
    /// Score.
    pub score: RatingScore,
    /// Comment.
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_range() {
        assert!(RatingScore::try_from(0).is_err());
        assert!(RatingScore::try_from(6).is_err());
        assert!(RatingScore::try_from(-1).is_err());
        assert_eq!(RatingScore::try_from(5).unwrap().get(), 5);
        assert_eq!(RatingScore::try_from(1).unwrap().get(), 1);
    }

    #[test]
    fn test_score_deserialization_rejects_out_of_range() {
        assert!(serde_json::from_str::<RatingScore>("7").is_err());
        let score: RatingScore = serde_json::from_str("4").unwrap();
        assert_eq!(score.get(), 4);
        assert_eq!(serde_json::to_string(&score).unwrap(), "4");
    }
}
