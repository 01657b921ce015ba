//! Scripted AI services for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ai::conversation::ConversationTurn;
use crate::ai::errors::{AiError, AiResult};
use crate::ai::feedback::SessionFeedback;
use crate::ai::partner::{AiFuture, ConversationPartner};
use crate::ai::speech::{SpeechToText, TextToSpeech};

fn next<T>(queue: &Mutex<VecDeque<Option<T>>>, service: &'static str) -> AiResult<T> {
    let mut queue = queue
        .lock()
        .map_err(|_| AiError::EmptyResponse(service))?;
    queue
        .pop_front()
        .flatten()
        .ok_or(AiError::EmptyResponse(service))
}

/// Partner that plays back queued replies; `None` entries fail.
#[derive(Default)]
pub struct ScriptedPartner {
    replies: Mutex<VecDeque<Option<String>>>,
    feedback: Mutex<VecDeque<Option<SessionFeedback>>>,
    /// Prompt windows received, for assertions.
    pub windows: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedPartner {
    /// Queue replies in order.
    pub fn with_replies<I: IntoIterator<Item = Option<&'static str>>>(replies: I) -> Self {
        let partner = Self::default();
        if let Ok(mut queue) = partner.replies.lock() {
            queue.extend(replies.into_iter().map(|r| r.map(str::to_string)));
        }
        partner
    }

    /// Queue one feedback result.
    #[must_use]
    pub fn and_feedback(self, feedback: Option<SessionFeedback>) -> Self {
        if let Ok(mut queue) = self.feedback.lock() {
            queue.push_back(feedback);
        }
        self
    }
}

impl ConversationPartner for ScriptedPartner {
    fn reply(&self, window: Vec<ConversationTurn>) -> AiFuture<'_, AiResult<String>> {
        Box::pin(async move {
            if let Ok(mut windows) = self.windows.lock() {
                windows.push(window);
            }
            next(&self.replies, "scripted partner")
        })
    }

    fn feedback(&self, _transcript: String) -> AiFuture<'_, AiResult<SessionFeedback>> {
        Box::pin(async move { next(&self.feedback, "scripted feedback") })
    }
}

/// Recognizer that plays back queued transcripts; `None` entries fail.
#[derive(Default)]
pub struct ScriptedSpeech {
    transcripts: Mutex<VecDeque<Option<String>>>,
    audio_ok: bool,
}

impl ScriptedSpeech {
    /// Queue transcripts; synthesis succeeds when `audio_ok`.
    pub fn new<I: IntoIterator<Item = Option<&'static str>>>(transcripts: I, audio_ok: bool) -> Self {
        Self {
            transcripts: Mutex::new(
                transcripts
                    .into_iter()
                    .map(|t| t.map(str::to_string))
                    .collect(),
            ),
            audio_ok,
        }
    }
}

impl SpeechToText for ScriptedSpeech {
    fn transcribe(&self, _audio: Vec<u8>) -> AiFuture<'_, AiResult<String>> {
        Box::pin(async move { next(&self.transcripts, "scripted recognizer") })
    }
}

impl TextToSpeech for ScriptedSpeech {
    fn synthesize(&self, text: String) -> AiFuture<'_, AiResult<Vec<u8>>> {
        Box::pin(async move {
            if self.audio_ok {
                Ok(format!("mp3:{text}").into_bytes())
            } else {
                Err(AiError::EmptyResponse("scripted synthesizer"))
            }
        })
    }
}
