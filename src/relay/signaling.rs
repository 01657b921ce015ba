//! Session-establishment relay between the two human participants.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::errors::{VoxError, VoxResult};
use crate::core::ids::{RoomId, UserId};
use crate::core::kinds::PartnerKind;
use crate::protocol::handle::PeerHandle;
use crate::protocol::messages::{CallRequest, Outbound};
use crate::session::lifecycle::SessionLifecycle;
use crate::session::store::CloseOutcome;

/// A connection admitted to a room's group.
#[derive(Clone, Debug)]
pub struct CallMember {
    room_id: RoomId,
    handle: PeerHandle,
    username: String,
}

impl CallMember {
    /// Room joined.
    #[must_use]
    pub const fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Member's user id.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.handle.user_id()
    }
}

/// Relay for `offer`/`answer`/`ice_candidate` and hang-ups.
pub struct SignalingRelay {
    lifecycle: Arc<SessionLifecycle>,
}

impl SignalingRelay {
    /// Relay over the shared lifecycle.
    #[must_use]
    pub const fn new(lifecycle: Arc<SessionLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Admit a connection to the room's group.
    ///
    /// # Errors
    /// `RoomNotFound`, `Forbidden` for non-participants or AI rooms,
    /// `RoomClosed` once the room has ended, or a storage error.
    pub async fn join(
        &self,
        room_id: RoomId,
        handle: PeerHandle,
        username: String,
    ) -> VoxResult<CallMember> {
        let room = self.lifecycle.room(room_id).await?;
        let user = handle.user_id();
        if !room.is_participant(user) {
            return Err(VoxError::Forbidden(format!(
                "user {user} is not a participant of room {room_id}"
            )));
        }
        if room.partner_kind != PartnerKind::Human {
            return Err(VoxError::Forbidden(format!("room {room_id} has no human peer")));
        }
        if !room.is_active() {
            return Err(VoxError::RoomClosed(room_id));
        }

        self.lifecycle.hub().join(room_id, handle.clone());
        info!(room_id = %room_id, user = %user, "joined call");
        Ok(CallMember {
            room_id,
            handle,
            username,
        })
    }

    /// Handle one JSON frame from a member.
    ///
    /// # Errors
    /// Returns an error only if an `end_call` cannot be persisted.
    pub async fn handle_frame(
        &self,
        member: &CallMember,
        frame: serde_json::Value,
    ) -> VoxResult<()> {
        match CallRequest::classify(frame) {
            CallRequest::Signal(payload) => {
                let delivered = self
                    .lifecycle
                    .hub()
                    .broadcast_except(
                        member.room_id,
                        member.handle.connection_id(),
                        Outbound::Forward(payload),
                    )
                    .await;
                debug!(room_id = %member.room_id, delivered, "signal forwarded");
            }
            CallRequest::EndCall => {
                self.end_call(member).await?;
            }
            CallRequest::Unknown(kind) => {
                debug!(room_id = %member.room_id, kind = %kind, "ignored call frame");
            }
        }
        Ok(())
    }

    /// Hang up. Only the first end broadcasts `call_ended`.
    ///
    /// # Errors
    /// Returns an error if the room cannot be closed.
    pub async fn end_call(&self, member: &CallMember) -> VoxResult<CloseOutcome> {
        self.lifecycle
            .end_room(member.room_id, member.user_id(), &member.username, Utc::now())
            .await
    }

    /// Connection dropped: leave the group, then end the call for the rest.
    pub async fn disconnect(&self, member: CallMember) {
        self.lifecycle
            .hub()
            .leave(member.room_id, member.handle.connection_id());
        if let Err(err) = self.end_call(&member).await {
            warn!(room_id = %member.room_id, error = %err, "end on disconnect failed");
        }
    }
}
