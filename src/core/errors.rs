//! Error types for the matchmaking engine.

use thiserror::Error;

use crate::core::ids::{RoomId, UserId};

/// Engine error type.
#[derive(Debug, Error)]
pub enum VoxError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed client request or stored row.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// Caller could not be authenticated.
    #[error("unauthorized")]
    Unauthorized,
    /// Caller is not allowed to act on the room.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Room does not exist.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    /// Room is no longer active.
    #[error("room {0} is not active")]
    RoomClosed(RoomId),
    /// Rating outside `1..=5`.
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),
    /// A rating already exists for this (room, rater) pair.
    #[error("user {rater} already rated room {room_id}")]
    AlreadyRated {
        /// Rated room.
        room_id: RoomId,
        /// User who tried to rate twice.
        rater: UserId,
    },
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoxError {
    /// Integrity errors are rejected operations; they are never retried.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Forbidden(_)
                | Self::RoomNotFound(_)
                | Self::RoomClosed(_)
                | Self::InvalidRating(_)
                | Self::AlreadyRated { .. }
        )
    }
}

/// Convenience result alias for engine operations.
pub type VoxResult<T> = Result<T, VoxError>;
