//! UI-agnostic conversation types
//!
//! These are shared between the terminal front end and anything else that
//! embeds the controller, and they double as the persisted and wire shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message in the co-pilot conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MessageMeta>,
    /// Set when the stream for this reply failed; `content` holds the error.
    #[serde(default, skip_serializing_if = "is_false")]
    pub failed: bool,
}

fn is_false(value: &bool) -> bool {
    !value
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Routing metadata the backend attaches to an assistant reply.
///
/// `intent` and `task_type` are the fields the backend always sends; anything
/// else it reports (e.g. `model`) lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            meta: None,
            failed: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            meta: None,
            failed: false,
        }
    }
}

impl MessageMeta {
    /// Shallow merge: every field present in `other` overwrites ours.
    pub fn merge(&mut self, other: MessageMeta) {
        if other.intent.is_some() {
            self.intent = other.intent;
        }
        if other.task_type.is_some() {
            self.task_type = other.task_type;
        }
        self.extra.extend(other.extra);
    }
}
