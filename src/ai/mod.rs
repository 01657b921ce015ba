//! AI practice partner: conversation state, model, speech and feedback.

pub mod conversation;
pub mod errors;
pub mod feedback;
pub mod partner;
#[cfg(test)]
pub mod scripted;
pub mod speech;
pub mod transcript_store;

pub use conversation::{ConversationTurn, ConversationWindow, TurnRole};
pub use errors::{AiError, AiResult};
pub use feedback::SessionFeedback;
pub use partner::{AiFuture, ConversationPartner, OllamaPartner};
pub use speech::{OpenAiSpeech, SpeechToText, TextToSpeech, sniff_audio_name};
pub use transcript_store::{SqliteTranscriptStore, TranscriptRecord, TranscriptStore};
