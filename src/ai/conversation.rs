//! Conversation turns kept for one AI call.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::kinds::KindParseError;

/// Who produced a turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The practicing user.
    User,
    /// The AI coach.
    Assistant,
}

impl TurnRole {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Speaker label used when a conversation is rendered as text.
    #[must_use]
    pub const fn speaker(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "AI",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = KindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(KindParseError {
                kind: "turn role",
                value: other.to_string(),
            }),
        }
    }
}

/// One utterance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Speaker.
    pub role: TurnRole,
    /// Text of the utterance.
    pub text: String,
}

impl ConversationTurn {
    /// User turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    /// Assistant turn.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// Full ordered transcript of one call.
///
/// Nothing is ever dropped; only the view handed to the model is bounded.
#[derive(Clone, Debug, Default)]
pub struct ConversationWindow {
    turns: Vec<ConversationTurn>,
}

impl ConversationWindow {
    /// Empty conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Every turn so far.
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `max_turns` turns.
    #[must_use]
    pub fn prompt_window(&self, max_turns: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(max_turns);
        &self.turns[start..]
    }

    /// Whether nothing has been said.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// `Speaker: text` lines for the whole conversation.
    #[must_use]
    pub fn render(&self) -> String {
        render_turns(&self.turns)
    }
}

/// `Speaker: text` lines for a slice of turns.
#[must_use]
pub fn render_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role.speaker(), turn.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_window_keeps_last_turns() {
        let mut window = ConversationWindow::new();
        for i in 0..15 {
            window.push(ConversationTurn::user(format!("turn {i}")));
        }
        let view = window.prompt_window(12);
        assert_eq!(view.len(), 12);
        assert_eq!(view[0].text, "turn 3");
        assert_eq!(window.len(), 15);
        assert_eq!(window.prompt_window(100).len(), 15);
    }

    #[test]
    fn test_render() {
        let mut window = ConversationWindow::new();
        window.push(ConversationTurn::user("I goed there"));
        window.push(ConversationTurn::assistant("You mean went?"));
        assert_eq!(window.render(), "User: I goed there\nAI: You mean went?");
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("assistant".parse::<TurnRole>().unwrap(), TurnRole::Assistant);
        assert!("system".parse::<TurnRole>().is_err());
    }
}
