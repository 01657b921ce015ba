//! Room groups: which live connections belong to which room.

use dashmap::DashMap;
use tracing::debug;

use crate::core::ids::{ConnectionId, RoomId};
use crate::protocol::handle::PeerHandle;
use crate::protocol::messages::Outbound;

/// Per-room broadcast groups.
///
/// Lookups clone the member handles out of the map so no shard lock is held
/// across a send.
#[derive(Debug, Default)]
pub struct RoomHub {
    groups: DashMap<RoomId, Vec<PeerHandle>>,
}

impl RoomHub {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room's group. Rejoining with the same
    /// connection id replaces the old handle.
    pub fn join(&self, room_id: RoomId, handle: PeerHandle) {
        let mut group = self.groups.entry(room_id).or_default();
        group.retain(|member| member.connection_id() != handle.connection_id());
        group.push(handle);
        debug!(room_id = %room_id, members = group.len(), "joined room group");
    }

    /// Remove a connection. Empty groups are dropped.
    pub fn leave(&self, room_id: RoomId, connection_id: ConnectionId) {
        let empty = self.groups.get_mut(&room_id).is_some_and(|mut group| {
            group.retain(|member| member.connection_id() != connection_id);
            group.is_empty()
        });
        if empty {
            self.groups.remove_if(&room_id, |_, group| group.is_empty());
        }
    }

    /// Number of live members.
    #[must_use]
    pub fn member_count(&self, room_id: RoomId) -> usize {
        self.groups.get(&room_id).map_or(0, |group| group.len())
    }

    fn members(&self, room_id: RoomId) -> Vec<PeerHandle> {
        self.groups
            .get(&room_id)
            .map(|group| group.clone())
            .unwrap_or_default()
    }

    /// Deliver to every member except `sender`, preserving per-member order.
    /// Returns how many members accepted the message.
    pub async fn broadcast_except(
        &self,
        room_id: RoomId,
        sender: ConnectionId,
        message: Outbound,
    ) -> usize {
        let mut delivered = 0;
        for member in self.members(room_id) {
            if member.connection_id() == sender {
                continue;
            }
            if member.send(message.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver to every member.
    pub async fn broadcast_all(&self, room_id: RoomId, message: Outbound) -> usize {
        let mut delivered = 0;
        for member in self.members(room_id) {
            if member.send(message.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::UserId;
    use crate::protocol::messages::ServerMessage;

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let hub = RoomHub::new();
        let room = RoomId::new(1);
        let (a, mut rx_a) = PeerHandle::channel(UserId::new(1), 4);
        let (b, mut rx_b) = PeerHandle::channel(UserId::new(2), 4);
        hub.join(room, a.clone());
        hub.join(room, b);

        let payload = serde_json::json!({"type": "offer", "sdp": "x"});
        let delivered = hub
            .broadcast_except(room, a.connection_id(), Outbound::Forward(payload.clone()))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_b.recv().await, Some(Outbound::Forward(payload)));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_all_and_leave() {
        let hub = RoomHub::new();
        let room = RoomId::new(2);
        let (a, mut rx_a) = PeerHandle::channel(UserId::new(1), 4);
        let (b, _rx_b) = PeerHandle::channel(UserId::new(2), 4);
        hub.join(room, a.clone());
        hub.join(room, b.clone());
        assert_eq!(hub.member_count(room), 2);

        hub.leave(room, b.connection_id());
        let delivered = hub.broadcast_all(room, ServerMessage::Searching.into()).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await, Some(ServerMessage::Searching.into()));

        hub.leave(room, a.connection_id());
        assert_eq!(hub.member_count(room), 0);
        assert_eq!(hub.broadcast_all(room, ServerMessage::Searching.into()).await, 0);
    }

    #[test]
    fn test_rejoin_replaces_handle() {
        let hub = RoomHub::new();
        let room = RoomId::new(3);
        let (a, _rx) = PeerHandle::channel(UserId::new(1), 4);
        hub.join(room, a.clone());
        hub.join(room, a);
        assert_eq!(hub.member_count(room), 1);
    }
}
