use serde::{Deserialize, Serialize};
use strum::Display;

use crate::app::domain::types::{MessageId, Timestamp};

/// Appended to an in-flight reply when the user cancels it.
pub const CANCELLED_MARKER: &str = "[Response cancelled]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Records produced by the engine itself, such as confirmation outcomes.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn user(id: MessageId, text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id,
            role: Role::User,
            content: text.into(),
            is_streaming: false,
            timestamp,
        }
    }

    /// An empty assistant reply that is still receiving deltas.
    pub fn assistant_placeholder(id: MessageId, timestamp: Timestamp) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            is_streaming: true,
            timestamp,
        }
    }

    pub fn system(id: MessageId, text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id,
            role: Role::System,
            content: text.into(),
            is_streaming: false,
            timestamp,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}
