use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::memories::MemoryKind;

/// A single turn in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: text.into(),
        }
    }

    /// Convert to the wire shape provider APIs expect.
    pub fn as_provider_message(&self) -> serde_json::Value {
        serde_json::json!({
            "role": self.role,
            "content": self.content,
        })
    }
}

/// Where a context fragment came from. Retrieval produces typed fragments;
/// rendering to chat turns happens last.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOrigin {
    /// A time-bucketed summary retrieved by kind.
    MemorySummary {
        kind: MemoryKind,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    },
    /// An already-answered message from the same calendar span.
    TodayMessage { from_assistant: bool },
    /// An embedding-similarity match against stored messages or memories.
    SimilarityMatch { created_at: DateTime<Utc> },
    /// The directive-stripped unanswered text, always last.
    ActiveRequest,
}

/// One ordered piece of model context.
#[derive(Debug, Clone)]
pub struct ContextFragment {
    pub origin: FragmentOrigin,
    pub text: String,
}

impl ContextFragment {
    pub fn new(origin: FragmentOrigin, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
        }
    }
}

/// Render fragments into a chat history, prefixed by a system prompt.
///
/// Summaries and similarity matches become system turns; same-day messages
/// become user/assistant turns by direction; the active request is the final
/// user turn.
pub fn render_history(system_prompt: &str, fragments: &[ContextFragment]) -> Vec<ChatMessage> {
    let mut history = vec![ChatMessage::system(system_prompt)];
    for fragment in fragments {
        match fragment.origin {
            FragmentOrigin::MemorySummary { .. } | FragmentOrigin::SimilarityMatch { .. } => {
                history.push(ChatMessage::system(&fragment.text));
            }
            FragmentOrigin::TodayMessage { from_assistant } => {
                if from_assistant {
                    history.push(ChatMessage::assistant(&fragment.text));
                } else {
                    history.push(ChatMessage::user(&fragment.text));
                }
            }
            FragmentOrigin::ActiveRequest => {
                history.push(ChatMessage::user(&fragment.text));
            }
        }
    }
    history
}
