//! Core types shared by every subsystem.

pub mod config;
pub mod errors;
pub mod ids;
pub mod kinds;

pub use config::{
    ConnectionConfig, LlmConfig, MatchmakingConfig, ServerConfig, SpeechConfig, StorageConfig,
    VoxConfig,
};
pub use errors::{VoxError, VoxResult};
pub use ids::{ConnectionId, RatingId, RoomId, UserId};
pub use kinds::{CallRole, GenderFilter, KindParseError, Level, PartnerKind, RoomStatus};
