//! Configuration for the matchmaking service.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{VoxError, VoxResult};

/// Top-level service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VoxConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Queue and matching settings.
    pub matchmaking: MatchmakingConfig,
    /// WebSocket liveness settings.
    pub connection: ConnectionConfig,
    /// Conversation partner settings.
    pub llm: LlmConfig,
    /// Speech-to-text / text-to-speech settings.
    pub speech: SpeechConfig,
}

impl VoxConfig {
    /// Defaults overlaid with `VOXPAIR_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is present but unparsable, or if the
    /// resulting configuration fails validation.
    pub fn from_env() -> VoxResult<Self> {
        let mut config = Self::default();

        if let Some(host) = env_string("VOXPAIR_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("VOXPAIR_PORT")? {
            config.server.port = port;
        }
        if let Some(path) = env_string("VOXPAIR_DB") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(flag) = env_parse::<bool>("VOXPAIR_ENFORCE_GENDER")? {
            config.matchmaking.enforce_gender_filter = flag;
        }
        if let Some(seconds) = env_parse::<u64>("VOXPAIR_MAX_SEARCH_SECONDS")? {
            config.matchmaking.max_search_seconds = seconds;
        }
        if let Some(url) = env_string("VOXPAIR_OLLAMA_URL") {
            config.llm.base_url = Some(url);
        }
        if let Some(model) = env_string("VOXPAIR_MODEL") {
            config.llm.model = model;
        }
        if let Some(url) = env_string("VOXPAIR_SPEECH_URL") {
            config.speech.base_url = url;
        }
        if let Some(key) = env_string("VOXPAIR_SPEECH_API_KEY") {
            config.speech.api_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> VoxResult<()> {
        if self.connection.heartbeat_interval_seconds == 0 {
            return Err(VoxError::InvalidConfig(
                "connection.heartbeat_interval_seconds must be > 0".to_string(),
            ));
        }

        if self.connection.client_timeout_seconds <= self.connection.heartbeat_interval_seconds {
            return Err(VoxError::InvalidConfig(
                "connection.client_timeout_seconds must exceed the heartbeat interval".to_string(),
            ));
        }

        if self.connection.outbound_buffer == 0 {
            return Err(VoxError::InvalidConfig(
                "connection.outbound_buffer must be > 0".to_string(),
            ));
        }

        if self.matchmaking.sweep_interval_seconds == 0 {
            return Err(VoxError::InvalidConfig(
                "matchmaking.sweep_interval_seconds must be > 0".to_string(),
            ));
        }

        if self.llm.prompt_window_turns == 0 {
            return Err(VoxError::InvalidConfig(
                "llm.prompt_window_turns must be > 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.llm.base_url {
            Url::parse(base_url)?;
        }

        Url::parse(&self.speech.base_url)?;

        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> VoxResult<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| VoxError::InvalidConfig(format!("{key} has an invalid value: {raw}"))),
        None => Ok(None),
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("voxpair.sqlite"),
        }
    }
}

/// Queue and matching settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Require compatible gender filters. Off by default: the filter is
    /// recorded on the room but candidates are matched on level only.
    pub enforce_gender_filter: bool,
    /// Entries waiting longer than this are evicted by the sweeper.
    pub max_search_seconds: u64,
    /// Interval between sweeper runs.
    pub sweep_interval_seconds: u64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            enforce_gender_filter: false,
            max_search_seconds: 600,
            sweep_interval_seconds: 30,
        }
    }
}

impl MatchmakingConfig {
    /// Maximum queue wait as a `chrono` duration.
    #[must_use]
    pub fn max_search_age(&self) -> chrono::Duration {
        i64::try_from(self.max_search_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// WebSocket liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Seconds between server pings.
    pub heartbeat_interval_seconds: u64,
    /// Seconds of client silence before the connection is dropped.
    pub client_timeout_seconds: u64,
    /// Capacity of each connection's outbound channel.
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 15,
            client_timeout_seconds: 45,
            outbound_buffer: 64,
        }
    }
}

impl ConnectionConfig {
    /// Heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Client timeout.
    #[must_use]
    pub const fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_seconds)
    }
}

/// Conversation partner settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Max tokens per reply.
    pub max_tokens: Option<u64>,
    /// Max tokens for the end-of-call feedback document.
    pub feedback_max_tokens: Option<u64>,
    /// Optional custom base URL.
    pub base_url: Option<String>,
    /// Number of most recent turns sent with each request.
    pub prompt_window_turns: usize,
    /// System prompt of the coach persona.
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "ministral-3:8b-instruct-2512-q8_0".to_string(),
            temperature: 0.7,
            max_tokens: Some(150),
            feedback_max_tokens: Some(500),
            base_url: None,
            prompt_window_turns: 12,
            system_prompt: "You are Alex, a friendly and encouraging English speaking coach. \
                Have natural, engaging conversations to help the user practice speaking. \
                Gently correct major grammar mistakes. Keep responses concise (2-3 sentences max). \
                Encourage the user and ask follow-up questions."
                .to_string(),
        }
    }
}

/// Speech service settings (OpenAI-compatible audio endpoints).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Transcription model.
    pub stt_model: String,
    /// Transcription language hint.
    pub language: String,
    /// Synthesis model.
    pub tts_model: String,
    /// Synthesis voice.
    pub voice: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            stt_model: "whisper-1".to_string(),
            language: "en".to_string(),
            tts_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            timeout_seconds: 30,
        }
    }
}
