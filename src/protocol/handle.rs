//! Reachable handle for one live connection.

use tokio::sync::mpsc;

use crate::core::ids::{ConnectionId, UserId};
use crate::protocol::messages::Outbound;

/// Cloneable sender side of a connection's outbound queue.
///
/// The queue stores one of these per waiting user so that a match performed
/// on another connection can still notify it.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    connection_id: ConnectionId,
    user_id: UserId,
    sender: mpsc::Sender<Outbound>,
}

impl PeerHandle {
    /// Create a handle and the receiver drained by the connection's writer.
    #[must_use]
    pub fn channel(user_id: UserId, buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                connection_id: ConnectionId::new(),
                user_id,
                sender,
            },
            receiver,
        )
    }

    /// Connection this handle delivers to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Authenticated owner of the connection.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue a message. Returns `false` if the connection is gone.
    pub async fn send(&self, message: impl Into<Outbound>) -> bool {
        self.sender.send(message.into()).await.is_ok()
    }

    /// Whether the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ServerMessage;

    #[tokio::test]
    async fn test_send_and_close() {
        let (handle, mut rx) = PeerHandle::channel(UserId::new(1), 4);
        assert!(handle.send(ServerMessage::Searching).await);
        assert_eq!(rx.recv().await, Some(Outbound::Message(ServerMessage::Searching)));

        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(ServerMessage::Cancelled).await);
    }

    #[test]
    fn test_clones_share_connection() {
        let (handle, _rx) = PeerHandle::channel(UserId::new(1), 4);
        let clone = handle.clone();
        assert_eq!(handle.connection_id(), clone.connection_id());
        assert_eq!(clone.user_id(), UserId::new(1));
    }
}
