//! Speech recognition and synthesis over OpenAI-compatible audio endpoints.

use std::time::Duration;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::ai::errors::{AiError, AiResult};
use crate::ai::partner::AiFuture;
use crate::core::config::SpeechConfig;

/// EBML header that opens every WebM/Matroska stream.
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Upload file name for a recorded clip, chosen from its leading bytes.
#[must_use]
pub fn sniff_audio_name(audio: &[u8]) -> &'static str {
    if audio.starts_with(&EBML_MAGIC) {
        "audio.webm"
    } else {
        "audio.mp4"
    }
}

fn mime_for(file_name: &str) -> &'static str {
    if file_name.ends_with(".webm") {
        "audio/webm"
    } else {
        "audio/mp4"
    }
}

/// Speech-to-text.
pub trait SpeechToText: Send + Sync {
    /// Transcribe one clip. An empty string means nothing was heard.
    ///
    /// # Errors
    /// Returns an error if the service call fails.
    fn transcribe(&self, audio: Vec<u8>) -> AiFuture<'_, AiResult<String>>;
}

/// Text-to-speech.
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text` as mp3 bytes.
    ///
    /// # Errors
    /// Returns an error if the service call fails.
    fn synthesize(&self, text: String) -> AiFuture<'_, AiResult<Vec<u8>>>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

/// Client for `/audio/transcriptions` and `/audio/speech`.
#[derive(Clone)]
pub struct OpenAiSpeech {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    stt_model: String,
    language: String,
    tts_model: String,
    voice: String,
}

impl OpenAiSpeech {
    /// Build the client.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &SpeechConfig) -> AiResult<Self> {
        Url::parse(&config.base_url)?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            stt_model: config.stt_model.clone(),
            language: config.language.clone(),
            tts_model: config.tts_model.clone(),
            voice: config.voice.clone(),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http_client.post(format!("{}/{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> AiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, error = %body, "speech service error");
        Err(AiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl SpeechToText for OpenAiSpeech {
    fn transcribe(&self, audio: Vec<u8>) -> AiFuture<'_, AiResult<String>> {
        Box::pin(async move {
            let file_name = sniff_audio_name(&audio);
            let bytes = audio.len();
            let part = Part::bytes(audio)
                .file_name(file_name)
                .mime_str(mime_for(file_name))?;
            let form = Form::new()
                .text("model", self.stt_model.clone())
                .text("language", self.language.clone())
                .part("file", part);

            let response = self.post("audio/transcriptions").multipart(form).send().await?;
            let parsed: TranscriptionResponse = Self::check(response).await?.json().await?;
            let text = parsed.text.trim().to_string();
            debug!(bytes, file_name, chars = text.len(), "transcribed clip");
            Ok(text)
        })
    }
}

impl TextToSpeech for OpenAiSpeech {
    fn synthesize(&self, text: String) -> AiFuture<'_, AiResult<Vec<u8>>> {
        Box::pin(async move {
            let body = SpeechRequest {
                model: &self.tts_model,
                voice: &self.voice,
                input: &text,
                response_format: "mp3",
            };
            let response = self.post("audio/speech").json(&body).send().await?;
            let audio = Self::check(response).await?.bytes().await?.to_vec();
            if audio.is_empty() {
                return Err(AiError::EmptyResponse("speech synthesis"));
            }
            debug!(chars = text.len(), bytes = audio.len(), "synthesized reply");
            Ok(audio)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_webm_and_default() {
        assert_eq!(sniff_audio_name(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]), "audio.webm");
        assert_eq!(sniff_audio_name(&[0x00, 0x00, 0x00, 0x18, 0x66]), "audio.mp4");
        assert_eq!(sniff_audio_name(&[0x1A, 0x45]), "audio.mp4");
        assert_eq!(sniff_audio_name(&[]), "audio.mp4");
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let config = SpeechConfig {
            base_url: "not a url".to_string(),
            ..SpeechConfig::default()
        };
        assert!(matches!(OpenAiSpeech::new(&config), Err(AiError::Url(_))));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = SpeechConfig {
            base_url: "http://localhost:9000/v1/".to_string(),
            ..SpeechConfig::default()
        };
        let speech = OpenAiSpeech::new(&config).unwrap();
        assert_eq!(speech.base_url, "http://localhost:9000/v1");
    }
}
