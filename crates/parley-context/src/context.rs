//! Conversation message types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Same message with its content replaced, keeping id and role.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            id: self.id,
            role: self.role,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = Message::assistant("hi");
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["role"], "assistant");
        assert_eq!(encoded["content"], "hi");
    }

    #[test]
    fn missing_id_is_generated_on_decode() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"system","content":"be brief"}"#).unwrap();
        assert!(msg.is_system());
        assert_eq!(msg.content, "be brief");
    }

    #[test]
    fn with_content_keeps_identity() {
        let msg = Message::user("  hello  ");
        let trimmed = msg.with_content("hello");
        assert_eq!(trimmed.id, msg.id);
        assert_eq!(trimmed.role, MessageRole::User);
        assert_eq!(trimmed.content, "hello");
    }
}
