//! Wire envelopes exchanged over the realtime sockets.
//!
//! Every text frame is a JSON object tagged by `type`. Signaling payloads are
//! relayed verbatim, so the call socket classifies raw JSON values instead of
//! deserializing into a closed enum.

use serde::{Deserialize, Serialize};

use crate::ai::feedback::SessionFeedback;
use crate::core::ids::RoomId;
use crate::core::kinds::{CallRole, GenderFilter, Level};

/// Requests accepted on the matchmaking socket.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchRequest {
    /// Start (or refresh) a search.
    Search {
        /// Partner gender preference.
        #[serde(default)]
        gender_filter: GenderFilter,
        /// Partner level preference.
        #[serde(default)]
        level: Level,
    },
    /// Leave the queue.
    Cancel,
}

/// Requests accepted on the AI call socket (besides binary audio).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AiRequest {
    /// Finish the session and ask for feedback.
    End,
}

/// Signaling kinds forwarded verbatim between peers.
pub const SIGNAL_KINDS: [&str; 3] = ["offer", "answer", "ice_candidate"];

/// Classified frame received on the call socket.
#[derive(Clone, Debug, PartialEq)]
pub enum CallRequest {
    /// Opaque session-establishment payload.
    Signal(serde_json::Value),
    /// Hang up.
    EndCall,
    /// Unknown `type`; ignored.
    Unknown(String),
}

impl CallRequest {
    /// Classify a raw JSON frame by its `type` field.
    #[must_use]
    pub fn classify(value: serde_json::Value) -> Self {
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        if SIGNAL_KINDS.contains(&kind.as_str()) {
            Self::Signal(value)
        } else if kind == "end_call" {
            Self::EndCall
        } else {
            Self::Unknown(kind)
        }
    }
}

/// Partner summary carried by `matched`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartnerInfo {
    /// Display name.
    pub name: String,
    /// Login name.
    pub username: String,
}

/// Messages the server sends as JSON text frames.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A room was created for this user.
    Matched {
        /// New room.
        room_id: RoomId,
        /// Assigned side.
        role: CallRole,
        /// The other participant.
        partner: PartnerInfo,
    },
    /// Queued, waiting for a partner.
    Searching,
    /// Left the queue.
    Cancelled,
    /// The room was closed by a participant.
    CallEnded {
        /// Username of whoever ended the call.
        ended_by: String,
    },
    /// What the speech recognizer heard.
    UserTranscript {
        /// Transcript text.
        text: String,
    },
    /// The AI partner's reply.
    AiText {
        /// Reply text.
        text: String,
    },
    /// End-of-session feedback for an AI call.
    Feedback {
        /// Closed room.
        room_id: RoomId,
        /// Feedback document.
        data: SessionFeedback,
    },
    /// Rejected request.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

/// Everything that can be queued for delivery on one connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Typed server message.
    Message(ServerMessage),
    /// Payload relayed verbatim from a peer.
    Forward(serde_json::Value),
    /// Binary audio frame.
    Audio(Vec<u8>),
}

impl From<ServerMessage> for Outbound {
    fn from(message: ServerMessage) -> Self {
        Self::Message(message)
    }
}
