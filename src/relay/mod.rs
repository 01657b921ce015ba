//! Realtime relays: room groups, human signaling and AI calls.

pub mod ai_call;
pub mod hub;
pub mod signaling;

pub use ai_call::{AI_PARTNER_NAME, APOLOGY, AiCallSession, AiServices, GREETING_SEED};
pub use hub::RoomHub;
pub use signaling::{CallMember, SignalingRelay};
