//! Host-agnostic chat panel state.
//!
//! The transcript lives only in memory for the lifetime of a session; nothing
//! here is persisted.

use serde::{Deserialize, Serialize};

use crate::context::SelectionContext;

/// A chat message in the conversation. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_context: Option<SelectionContext>,
}

impl ChatMessage {
    pub fn user(text: &str, attached_context: Option<SelectionContext>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.to_string(),
            attached_context,
        }
    }

    pub fn assistant(text: &str) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.to_string(),
            attached_context: None,
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Append-only, ordered list of messages.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
