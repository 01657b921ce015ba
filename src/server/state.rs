//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::ai::partner::OllamaPartner;
use crate::ai::speech::OpenAiSpeech;
use crate::ai::transcript_store::SqliteTranscriptStore;
use crate::core::config::VoxConfig;
use crate::identity::directory::{IdentityDirectory, SqliteIdentityDirectory};
use crate::matchmaking::coordinator::MatchCoordinator;
use crate::queue::{InMemoryMatchQueue, MatchQueue};
use crate::relay::ai_call::AiServices;
use crate::relay::hub::RoomHub;
use crate::relay::signaling::SignalingRelay;
use crate::session::lifecycle::SessionLifecycle;
use crate::session::store::{RoomStore, SqliteRoomStore};

/// Shared application state.
pub struct AppState {
    /// Service configuration.
    pub config: VoxConfig,
    /// Profiles, presence flags and tokens.
    pub directory: Arc<dyn IdentityDirectory>,
    /// Waiting users.
    pub queue: Arc<dyn MatchQueue>,
    /// Room open/close funnel and ratings.
    pub lifecycle: Arc<SessionLifecycle>,
    /// Pairing logic for the matchmaking socket.
    pub coordinator: Arc<MatchCoordinator>,
    /// Signaling relay for the call socket.
    pub relay: Arc<SignalingRelay>,
    /// Services used by AI calls.
    pub ai: Arc<AiServices>,
}

impl AppState {
    /// Open the `SQLite` stores and the AI clients described by `config`.
    ///
    /// # Errors
    /// Returns an error if a store cannot be opened or a client cannot be built.
    pub async fn from_config(
        config: VoxConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let directory = Arc::new(SqliteIdentityDirectory::new(&config.storage).await?);
        let rooms = Arc::new(SqliteRoomStore::new(&config.storage).await?);
        let transcripts = Arc::new(SqliteTranscriptStore::new(&config.storage).await?);

        let partner = OllamaPartner::new(&config.llm)
            .map_err(|e| format!("Failed to create Ollama client: {e}"))?;
        let speech = Arc::new(
            OpenAiSpeech::new(&config.speech)
                .map_err(|e| format!("Failed to create speech client: {e}"))?,
        );

        let ai = Arc::new(AiServices {
            partner: Arc::new(partner),
            stt: speech.clone(),
            tts: speech,
            transcripts,
            prompt_window: config.llm.prompt_window_turns,
        });
        let queue = Arc::new(InMemoryMatchQueue::with_gender_filter(
            config.matchmaking.enforce_gender_filter,
        ));

        Ok(Self::from_parts(config, directory, queue, rooms, ai))
    }

    /// Wire the services together over already built stores.
    #[must_use]
    pub fn from_parts(
        config: VoxConfig,
        directory: Arc<dyn IdentityDirectory>,
        queue: Arc<dyn MatchQueue>,
        rooms: Arc<dyn RoomStore>,
        ai: Arc<AiServices>,
    ) -> Arc<Self> {
        let lifecycle = Arc::new(SessionLifecycle::new(rooms, Arc::new(RoomHub::new())));
        let coordinator = Arc::new(MatchCoordinator::new(
            Arc::clone(&queue),
            Arc::clone(&directory),
            Arc::clone(&lifecycle),
        ));
        let relay = Arc::new(SignalingRelay::new(Arc::clone(&lifecycle)));

        Arc::new(Self {
            config,
            directory,
            queue,
            lifecycle,
            coordinator,
            relay,
            ai,
        })
    }
}
