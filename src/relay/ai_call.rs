//! One practice call with the AI coach.
//!
//! Each clip runs recognition, then a model reply, then synthesis. Service
//! failures never end the call: the user hears a fixed apology or gets the
//! text without audio.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::ai::conversation::{ConversationTurn, ConversationWindow};
use crate::ai::feedback::SessionFeedback;
use crate::ai::partner::ConversationPartner;
use crate::ai::speech::{SpeechToText, TextToSpeech};
use crate::ai::transcript_store::TranscriptStore;
use crate::core::errors::VoxResult;
use crate::core::ids::{RoomId, UserId};
use crate::matchmaking::MatchCoordinator;
use crate::protocol::messages::{Outbound, ServerMessage};
use crate::session::lifecycle::SessionLifecycle;
use crate::session::store::CloseOutcome;

/// Reply used whenever recognition or the model fails.
pub const APOLOGY: &str = "I'm sorry, I had a small issue. Could you repeat that?";

/// First user turn, sent on connect so the coach opens the conversation.
pub const GREETING_SEED: &str = "Hello! I am ready to start our speaking practice.";

/// Partner name shown for AI rooms.
pub const AI_PARTNER_NAME: &str = "AI (Alex)";

/// Services an AI call depends on.
pub struct AiServices {
    /// Conversation model.
    pub partner: Arc<dyn ConversationPartner>,
    /// Recognizer.
    pub stt: Arc<dyn SpeechToText>,
    /// Synthesizer.
    pub tts: Arc<dyn TextToSpeech>,
    /// Transcript persistence.
    pub transcripts: Arc<dyn TranscriptStore>,
    /// Turns sent with each model request.
    pub prompt_window: usize,
}

/// State of one AI call.
pub struct AiCallSession {
    room_id: RoomId,
    user: UserId,
    username: String,
    window: ConversationWindow,
    spoken_turns: usize,
    services: Arc<AiServices>,
    lifecycle: Arc<SessionLifecycle>,
}

impl AiCallSession {
    /// Open an AI room for `user` and produce the coach's greeting.
    ///
    /// The user leaves the match queue and rooms they still have active are
    /// closed first.
    ///
    /// # Errors
    /// Returns an error if the queue fails or the room cannot be created.
    pub async fn start(
        services: Arc<AiServices>,
        lifecycle: Arc<SessionLifecycle>,
        matchmaking: &MatchCoordinator,
        user: UserId,
        username: String,
    ) -> VoxResult<(Self, Vec<Outbound>)> {
        if matchmaking.withdraw(user).await? {
            debug!(user = %user, "left the match queue for an ai call");
        }
        let now = Utc::now();
        lifecycle.close_abandoned(user, &username, now).await?;
        let room = lifecycle.open_ai_room(user, now).await?;

        let mut session = Self {
            room_id: room.id,
            user,
            username,
            window: ConversationWindow::new(),
            spoken_turns: 0,
            services,
            lifecycle,
        };
        let greeting = session.respond(GREETING_SEED.to_string()).await;
        Ok((session, greeting))
    }

    /// Room backing this call.
    #[must_use]
    pub const fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Conversation so far.
    #[must_use]
    pub const fn window(&self) -> &ConversationWindow {
        &self.window
    }

    /// Handle one recorded clip.
    pub async fn handle_audio(&mut self, audio: Vec<u8>) -> Vec<Outbound> {
        let transcript = match self.services.stt.transcribe(audio).await {
            Ok(text) => text,
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "transcription failed");
                return vec![ServerMessage::AiText {
                    text: APOLOGY.to_string(),
                }
                .into()];
            }
        };
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            debug!(room_id = %self.room_id, "empty transcript, turn skipped");
            return Vec::new();
        }

        self.spoken_turns += 1;
        let mut out = vec![Outbound::from(ServerMessage::UserTranscript {
            text: transcript.clone(),
        })];
        out.extend(self.respond(transcript).await);
        out
    }

    async fn respond(&mut self, user_text: String) -> Vec<Outbound> {
        self.record(ConversationTurn::user(user_text)).await;

        let window = self
            .window
            .prompt_window(self.services.prompt_window)
            .to_vec();
        let reply = match self.services.partner.reply(window).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "partner reply failed");
                return vec![ServerMessage::AiText {
                    text: APOLOGY.to_string(),
                }
                .into()];
            }
        };
        self.record(ConversationTurn::assistant(reply.clone())).await;

        let mut out = vec![Outbound::from(ServerMessage::AiText {
            text: reply.clone(),
        })];
        match self.services.tts.synthesize(reply).await {
            Ok(audio) => out.push(Outbound::Audio(audio)),
            Err(err) => warn!(room_id = %self.room_id, error = %err, "synthesis failed"),
        }
        out
    }

    async fn record(&mut self, turn: ConversationTurn) {
        if let Err(err) = self
            .services
            .transcripts
            .append(self.room_id, turn.clone(), Utc::now())
            .await
        {
            warn!(room_id = %self.room_id, error = %err, "transcript append failed");
        }
        self.window.push(turn);
    }

    /// Finish the call: close the room and build the feedback message.
    ///
    /// # Errors
    /// Returns an error if the room cannot be closed.
    pub async fn end(self) -> VoxResult<ServerMessage> {
        let outcome = self
            .lifecycle
            .end_room(self.room_id, self.user, &self.username, Utc::now())
            .await?;
        let data = if self.spoken_turns == 0 {
            SessionFeedback::empty()
        } else {
            match self.services.partner.feedback(self.window.render()).await {
                Ok(feedback) => feedback,
                Err(err) => {
                    warn!(room_id = %self.room_id, error = %err, "feedback generation failed");
                    SessionFeedback::fallback()
                }
            }
        };
        info!(
            room_id = %self.room_id,
            turns = self.window.len(),
            score = data.score,
            duration_seconds = outcome.room().duration_seconds.unwrap_or(0),
            "ai call ended"
        );
        Ok(ServerMessage::Feedback {
            room_id: self.room_id,
            data,
        })
    }

    /// Close the room without feedback (socket dropped).
    ///
    /// # Errors
    /// Returns an error if the room cannot be closed.
    pub async fn abandon(self) -> VoxResult<CloseOutcome> {
        self.lifecycle
            .end_room(self.room_id, self.user, &self.username, Utc::now())
            .await
    }
}
