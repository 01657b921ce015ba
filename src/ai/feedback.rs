//! End-of-session feedback document.

use serde::{Deserialize, Serialize};

/// Structured feedback sent when an AI call ends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
    /// Overall score, 0..=100.
    #[serde(default)]
    pub score: u8,
    /// Things done well.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Areas to work on.
    #[serde(default)]
    pub improvements: Vec<String>,
    /// Specific mistakes with corrections; models return strings or objects.
    #[serde(default)]
    pub mistakes: Vec<serde_json::Value>,
    /// Short summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_comment: Option<String>,
}

impl SessionFeedback {
    /// Document for a session where nothing was said.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Document used when generation fails.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            score: 70,
            strengths: vec!["Good effort!".to_string()],
            improvements: vec!["Keep practicing".to_string()],
            mistakes: Vec::new(),
            overall_comment: Some("Great session! Keep it up.".to_string()),
        }
    }

    /// Parse model output. Tolerates prose or code fences around the JSON
    /// object and fractional or out-of-range scores.
    ///
    /// # Errors
    /// Returns an error if no JSON object can be parsed.
    pub fn from_model_output(text: &str) -> Result<Self, serde_json::Error> {
        let body = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => text,
        };
        let draft: FeedbackDraft = serde_json::from_str(body)?;
        Ok(draft.into())
    }
}

#[derive(Deserialize)]
struct FeedbackDraft {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
    #[serde(default)]
    mistakes: Vec<serde_json::Value>,
    #[serde(default)]
    overall_comment: Option<String>,
}

impl From<FeedbackDraft> for SessionFeedback {
    fn from(draft: FeedbackDraft) -> Self {
        // Clamped to 0..=100 before the cast.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let score = draft.score.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8;
        Self {
            score,
            strengths: draft.strengths,
            improvements: draft.improvements,
            mistakes: draft.mistakes,
            overall_comment: draft
                .overall_comment
                .map(|comment| comment.trim().to_string())
                .filter(|comment| !comment.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_shape() {
        let value = serde_json::to_value(SessionFeedback::empty()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"score": 0, "strengths": [], "improvements": [], "mistakes": []})
        );
    }

    #[test]
    fn test_parse_fenced_output() {
        let text = "Here you go:\n```json\n{\"score\": 82.6, \"strengths\": [\"fluency\"], \
                    \"improvements\": [\"articles\"], \"mistakes\": [{\"said\": \"goed\", \
                    \"correct\": \"went\"}], \"overall_comment\": \" Nice. \"}\n```";
        let feedback = SessionFeedback::from_model_output(text).unwrap();
        assert_eq!(feedback.score, 83);
        assert_eq!(feedback.strengths, vec!["fluency"]);
        assert_eq!(feedback.mistakes.len(), 1);
        assert_eq!(feedback.overall_comment.as_deref(), Some("Nice."));
    }

    #[test]
    fn test_score_is_clamped() {
        let feedback = SessionFeedback::from_model_output(r#"{"score": 140}"#).unwrap();
        assert_eq!(feedback.score, 100);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(SessionFeedback::from_model_output("no json here").is_err());
    }
}
