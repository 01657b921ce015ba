//! WebSocket endpoints: matchmaking, human calls and AI calls.
//!
//! Every socket is split into a reader owned by the handler and a writer task
//! draining the connection's outbound channel. The writer also sends the
//! heartbeat pings. The connection ends when the client closes, stays silent
//! past the client timeout, or the writer fails; the handler then runs the
//! endpoint's disconnect path (dequeue, end the call, or abandon the AI room).

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::ConnectionConfig;
use crate::core::ids::{RoomId, UserId};
use crate::identity::directory::UserProfile;
use crate::matchmaking::coordinator::MatchSession;
use crate::protocol::handle::PeerHandle;
use crate::protocol::messages::{AiRequest, MatchRequest, Outbound, ServerMessage};
use crate::relay::ai_call::AiCallSession;
use crate::server::auth::AuthUser;
use crate::server::state::AppState;

/// Time the writer gets to flush queued frames on close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Encode one outbound item as a WebSocket frame.
///
/// # Errors
/// Returns an error if a typed message cannot be serialized.
pub fn to_frame(outbound: Outbound) -> Result<Message, serde_json::Error> {
    Ok(match outbound {
        Outbound::Message(message) => Message::Text(serde_json::to_string(&message)?.into()),
        Outbound::Forward(payload) => Message::Text(payload.to_string().into()),
        Outbound::Audio(audio) => Message::Binary(audio.into()),
    })
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    heartbeat: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(item) => match to_frame(item) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "dropping unserializable frame");
                        continue;
                    }
                },
                None => break,
            },
            _ = ticker.tick() => Message::Ping(Bytes::new()),
        };
        if sink.send(frame).await.is_err() {
            cancel.cancel();
            break;
        }
    }
    let _ = sink.close().await;
}

/// One accepted socket: the read half, the writer task and the handle peers
/// use to reach it.
pub struct SocketLink {
    reader: SplitStream<WebSocket>,
    handle: PeerHandle,
    cancel: CancellationToken,
    writer: JoinHandle<()>,
    client_timeout: Duration,
}

impl SocketLink {
    /// Split the socket and start its writer.
    #[must_use]
    pub fn open(socket: WebSocket, user: UserId, config: &ConnectionConfig) -> Self {
        let (sink, reader) = socket.split();
        let (handle, outbound) = PeerHandle::channel(user, config.outbound_buffer);
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(
            sink,
            outbound,
            config.heartbeat_interval(),
            cancel.clone(),
        ));
        Self {
            reader,
            handle,
            cancel,
            writer,
            client_timeout: config.client_timeout(),
        }
    }

    /// Handle delivering to this socket.
    #[must_use]
    pub const fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// Next client frame, or `None` once the connection is over.
    ///
    /// Pings and pongs are returned too so they count as activity.
    pub async fn next(&mut self) -> Option<Message> {
        tokio::select! {
            () = self.cancel.cancelled() => None,
            next = tokio::time::timeout(self.client_timeout, self.reader.next()) => match next {
                Ok(Some(Ok(Message::Close(_))) | None) => None,
                Ok(Some(Ok(message))) => Some(message),
                Ok(Some(Err(err))) => {
                    debug!(error = %err, "socket read failed");
                    None
                }
                Err(_) => {
                    info!(user = %self.handle.user_id(), "client timed out");
                    self.cancel.cancel();
                    None
                }
            },
        }
    }

    /// Queue one message.
    pub async fn send(&self, message: impl Into<Outbound>) {
        self.handle.send(message).await;
    }

    /// Queue several messages in order.
    pub async fn deliver(&self, messages: Vec<Outbound>) {
        for message in messages {
            self.handle.send(message).await;
        }
    }

    /// Queue an `error` message.
    pub async fn send_error(&self, message: impl Into<String>) {
        self.send(ServerMessage::Error {
            message: message.into(),
        })
        .await;
    }

    /// Flush what is queued and close the socket.
    pub async fn close(self) {
        let Self {
            handle,
            cancel,
            mut writer,
            ..
        } = self;
        drop(handle);
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
            cancel.cancel();
            writer.abort();
        }
    }
}

/// `GET /ws/voice-match`
pub async fn voice_match(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AuthUser(profile): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| match_socket(socket, state, profile))
}

async fn match_socket(socket: WebSocket, state: Arc<AppState>, profile: UserProfile) {
    let user = profile.id;
    let mut link = SocketLink::open(socket, user, &state.config.connection);
    if let Err(err) = state.directory.set_online(user, true).await {
        warn!(user = %user, error = %err, "online flag not set");
    }
    info!(user = %user, "matchmaking connected");

    let mut session = MatchSession::new(link.handle().clone(), profile);
    while let Some(message) = link.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<MatchRequest>(text.as_str()) {
            Ok(request) => {
                if let Err(err) = state.coordinator.handle(&mut session, request).await {
                    warn!(user = %user, error = %err, "matchmaking request failed");
                    link.send_error(err.to_string()).await;
                }
            }
            Err(err) => {
                debug!(user = %user, error = %err, "invalid matchmaking frame");
                link.send_error(format!("invalid request: {err}")).await;
            }
        }
    }

    state.coordinator.disconnect(session).await;
    link.close().await;
    info!(user = %user, "matchmaking disconnected");
}

/// `GET /ws/voice-call/{room_id}`
pub async fn voice_call(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    AuthUser(profile): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| call_socket(socket, state, room_id, profile))
}

async fn call_socket(socket: WebSocket, state: Arc<AppState>, room_id: RoomId, profile: UserProfile) {
    let user = profile.id;
    let mut link = SocketLink::open(socket, user, &state.config.connection);
    let member = match state
        .relay
        .join(room_id, link.handle().clone(), profile.username)
        .await
    {
        Ok(member) => member,
        Err(err) => {
            info!(room_id = %room_id, user = %user, error = %err, "call join rejected");
            link.send_error(err.to_string()).await;
            link.close().await;
            return;
        }
    };

    while let Some(message) = link.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<serde_json::Value>(text.as_str()) {
            Ok(frame) => {
                if let Err(err) = state.relay.handle_frame(&member, frame).await {
                    warn!(room_id = %room_id, user = %user, error = %err, "call frame failed");
                    link.send_error(err.to_string()).await;
                }
            }
            Err(err) => debug!(room_id = %room_id, error = %err, "invalid call frame"),
        }
    }

    state.relay.disconnect(member).await;
    link.close().await;
    info!(room_id = %room_id, user = %user, "call disconnected");
}

/// `GET /ws/ai-call`
pub async fn ai_call(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AuthUser(profile): AuthUser,
) -> Response {
    ws.on_upgrade(move |socket| ai_socket(socket, state, profile))
}

async fn ai_socket(socket: WebSocket, state: Arc<AppState>, profile: UserProfile) {
    let user = profile.id;
    let mut link = SocketLink::open(socket, user, &state.config.connection);
    let started = AiCallSession::start(
        Arc::clone(&state.ai),
        Arc::clone(&state.lifecycle),
        &state.coordinator,
        user,
        profile.username,
    )
    .await;
    let (mut session, greeting) = match started {
        Ok(started) => started,
        Err(err) => {
            error!(user = %user, error = %err, "ai call could not start");
            link.send_error("Server error. Please try again.").await;
            link.close().await;
            return;
        }
    };
    link.deliver(greeting).await;

    let mut end_requested = false;
    while let Some(message) = link.next().await {
        match message {
            Message::Binary(audio) => {
                let replies = session.handle_audio(audio.to_vec()).await;
                link.deliver(replies).await;
            }
            Message::Text(text) => match serde_json::from_str::<AiRequest>(text.as_str()) {
                Ok(AiRequest::End) => {
                    end_requested = true;
                    break;
                }
                Err(err) => debug!(user = %user, error = %err, "ignored ai frame"),
            },
            _ => {}
        }
    }

    if end_requested {
        match session.end().await {
            Ok(feedback) => link.send(feedback).await,
            Err(err) => {
                warn!(user = %user, error = %err, "ai call end failed");
                link.send_error(err.to_string()).await;
            }
        }
    } else if let Err(err) = session.abandon().await {
        warn!(user = %user, error = %err, "ai room not closed on disconnect");
    }
    link.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::feedback::SessionFeedback;

    fn text_of(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_typed_messages_become_json_text() {
        let frame = to_frame(ServerMessage::Searching.into()).unwrap();
        assert_eq!(text_of(frame), serde_json::json!({"type": "searching"}));

        let frame = to_frame(
            ServerMessage::Feedback {
                room_id: RoomId::new(3),
                data: SessionFeedback::empty(),
            }
            .into(),
        )
        .unwrap();
        let value = text_of(frame);
        assert_eq!(value["type"], "feedback");
        assert_eq!(value["room_id"], 3);
        assert_eq!(value["data"]["score"], 0);
    }

    #[test]
    fn test_forwarded_payload_is_verbatim() {
        let payload = serde_json::json!({"type": "ice_candidate", "candidate": {"sdpMid": "0"}});
        let frame = to_frame(Outbound::Forward(payload.clone())).unwrap();
        assert_eq!(text_of(frame), payload);
    }

    #[test]
    fn test_audio_becomes_binary() {
        let frame = to_frame(Outbound::Audio(b"mp3".to_vec())).unwrap();
        match frame {
            Message::Binary(bytes) => assert_eq!(&bytes[..], b"mp3"),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}
