//! Enumerations shared by the queue, the coordinator and the stores.
//!
//! Every enum has a stable lowercase string form used both on the wire and in
//! `SQLite` columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a stored or received kind string is unknown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KindParseError {
    /// Name of the enum being parsed.
    pub kind: &'static str,
    /// The rejected value.
    pub value: String,
}

impl fmt::Display for KindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value: {}", self.kind, self.value)
    }
}

impl std::error::Error for KindParseError {}

/// Declare a string-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Stable string form for storage and the wire.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = KindParseError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $( $text => Ok(Self::$variant), )+
                    _ => Err(KindParseError {
                        kind: $label,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Speaking level requested for a partner.
    Level, "level" {
        /// Beginner speakers.
        Beginner => "beginner",
        /// Intermediate speakers.
        Intermediate => "intermediate",
        /// Advanced speakers.
        Advanced => "advanced",
        /// No preference.
        Any => "any",
    }
);

string_enum!(
    /// Partner gender preference collected at search time.
    GenderFilter, "gender_filter" {
        /// Male partners.
        Male => "male",
        /// Female partners.
        Female => "female",
        /// No preference.
        Any => "any",
    }
);

string_enum!(
    /// Whether the second party of a room is a person or the AI coach.
    PartnerKind, "partner_kind" {
        /// Human partner.
        Human => "human",
        /// Artificial partner.
        Ai => "ai",
    }
);

string_enum!(
    /// Room lifecycle status. Only moves forward.
    RoomStatus, "status" {
        /// Waiting for a partner.
        Searching => "searching",
        /// Call in progress.
        Active => "active",
        /// Call finished; duration recorded.
        Ended => "ended",
    }
);

string_enum!(
    /// Role assigned to each side of a freshly matched room.
    CallRole, "role" {
        /// The side that performed the match; sends the first offer.
        Caller => "caller",
        /// The side that was waiting in the queue.
        Callee => "callee",
    }
);

impl Default for Level {
    fn default() -> Self {
        Self::Any
    }
}

impl Default for GenderFilter {
    fn default() -> Self {
        Self::Any
    }
}

impl Level {
    /// `any` on either side or an exact match.
    #[must_use]
    pub fn compatible_with(self, other: Self) -> bool {
        self == Self::Any || other == Self::Any || self == other
    }
}

impl GenderFilter {
    /// `any` matches anything, otherwise both filters must be equal.
    #[must_use]
    pub fn compatible_with(self, other: Self) -> bool {
        self == Self::Any || other == Self::Any || self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_compatibility() {
        assert!(Level::Any.compatible_with(Level::Advanced));
        assert!(Level::Beginner.compatible_with(Level::Any));
        assert!(Level::Intermediate.compatible_with(Level::Intermediate));
        assert!(!Level::Beginner.compatible_with(Level::Advanced));
    }

    #[test]
    fn test_gender_compatibility() {
        assert!(GenderFilter::Any.compatible_with(GenderFilter::Female));
        assert!(GenderFilter::Male.compatible_with(GenderFilter::Male));
        assert!(!GenderFilter::Male.compatible_with(GenderFilter::Female));
    }

    #[test]
    fn test_round_trip_strings() {
        assert_eq!("ai".parse::<PartnerKind>().unwrap(), PartnerKind::Ai);
        assert_eq!(RoomStatus::Ended.to_string(), "ended");
        let err = "expert".parse::<Level>().unwrap_err();
        assert_eq!(err.kind, "level");
        assert_eq!(err.value, "expert");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let level: Level = serde_json::from_str("\"intermediate\"").unwrap();
        assert_eq!(level, Level::Intermediate);
        assert_eq!(serde_json::to_string(&CallRole::Callee).unwrap(), "\"callee\"");
    }
}
