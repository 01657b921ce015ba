//! Conversation partner backed by a local Ollama model through Rig.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::ollama;
use tracing::debug;

use crate::ai::conversation::{ConversationTurn, render_turns};
use crate::ai::errors::{AiError, AiResult};
use crate::ai::feedback::SessionFeedback;
use crate::core::config::LlmConfig;

/// Boxed future type for AI service calls.
pub type AiFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces coach replies and end-of-session feedback.
pub trait ConversationPartner: Send + Sync {
    /// Reply to the last user turn of `window`.
    ///
    /// # Errors
    /// Returns an error if the model call fails or yields no text.
    fn reply(&self, window: Vec<ConversationTurn>) -> AiFuture<'_, AiResult<String>>;

    /// Feedback document for a whole conversation.
    ///
    /// # Errors
    /// Returns an error if the model call fails or its output is not JSON.
    fn feedback(&self, transcript: String) -> AiFuture<'_, AiResult<SessionFeedback>>;
}

const FEEDBACK_PROMPT: &str = "Analyze this English speaking practice session and provide \
detailed feedback. Return only a JSON object with:
- score (0-100)
- strengths (list of 2-3 things done well)
- improvements (list of 2-3 areas to improve)
- mistakes (list of specific grammar/vocabulary mistakes with corrections)
- overall_comment (1-2 sentences summary)";

/// Ollama-backed partner.
pub struct OllamaPartner {
    model: ollama::CompletionModel,
    system_prompt: String,
    temperature: f64,
    max_tokens: Option<u64>,
    feedback_max_tokens: Option<u64>,
}

impl OllamaPartner {
    /// Build the client from configuration.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be built.
    pub fn new(config: &LlmConfig) -> AiResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(AiError::from)?;
        let model = client.completion_model(config.model.clone());

        Ok(Self {
            model,
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            feedback_max_tokens: config.feedback_max_tokens,
        })
    }
}

/// Prompt text for a reply: the recent conversation, then a cue for the
/// coach's next line.
#[must_use]
pub fn reply_prompt(window: &[ConversationTurn]) -> String {
    format!(
        "Conversation so far:\n{}\n\nReply to the user's last message as the coach. \
         Answer with the spoken reply only.",
        render_turns(window)
    )
}

impl ConversationPartner for OllamaPartner {
    fn reply(&self, window: Vec<ConversationTurn>) -> AiFuture<'_, AiResult<String>> {
        Box::pin(async move {
            let request = self
                .model
                .completion_request(reply_prompt(&window))
                .preamble(self.system_prompt.clone())
                .temperature(self.temperature)
                .max_tokens_opt(self.max_tokens)
                .build();

            let response = self.model.completion(request).await?;
            let text = extract_text(&response.choice);
            let text = text.trim();
            if text.is_empty() {
                return Err(AiError::EmptyResponse("conversation model"));
            }
            debug!(turns = window.len(), chars = text.len(), "partner replied");
            Ok(text.to_string())
        })
    }

    fn feedback(&self, transcript: String) -> AiFuture<'_, AiResult<SessionFeedback>> {
        Box::pin(async move {
            let prompt = format!("{FEEDBACK_PROMPT}\n\nConversation:\n{transcript}");
            let request = self
                .model
                .completion_request(prompt)
                .temperature(0.0)
                .max_tokens_opt(self.feedback_max_tokens)
                .build();

            let response = self.model.completion(request).await?;
            let text = extract_text(&response.choice);
            let feedback = SessionFeedback::from_model_output(&text)?;
            debug!(score = feedback.score, "feedback generated");
            Ok(feedback)
        })
    }
}

fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_prompt_lists_turns() {
        let window = vec![
            ConversationTurn::user("Hello! I am ready to start our speaking practice."),
            ConversationTurn::assistant("Great, what did you do today?"),
            ConversationTurn::user("I goed to work"),
        ];
        let prompt = reply_prompt(&window);
        assert!(prompt.contains("User: I goed to work"));
        assert!(prompt.contains("AI: Great, what did you do today?"));
    }

    #[test]
    fn test_partner_builds_without_network() {
        let partner = OllamaPartner::new(&LlmConfig::default());
        assert!(partner.is_ok());
    }
}
