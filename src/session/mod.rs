//! Rooms, ratings and their lifecycle.

pub mod lifecycle;
pub mod rating;
pub mod room;
pub mod store;

pub use lifecycle::{HistoryEntry, SessionLifecycle};
pub use rating::{NewRating, Rating, RatingScore};
pub use room::{Room, RoomClosing, format_duration, whole_seconds_between};
pub use store::{CloseOutcome, NewRoom, RatingInsert, RoomStore, SqliteRoomStore};
