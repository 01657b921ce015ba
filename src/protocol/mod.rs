//! Realtime wire protocol and connection handles.

pub mod handle;
pub mod messages;

pub use handle::PeerHandle;
pub use messages::{
    AiRequest, CallRequest, MatchRequest, Outbound, PartnerInfo, SIGNAL_KINDS, ServerMessage,
};
