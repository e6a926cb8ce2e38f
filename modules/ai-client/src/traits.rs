use async_trait::async_trait;

use crate::error::AiError;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// =============================================================================
// ChatAgent Trait
// =============================================================================

#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Send one non-streaming completion and return the first choice's text.
    /// `json_mode` asks the endpoint to constrain output to a JSON object.
    async fn chat(&self, messages: Vec<Message>, json_mode: bool) -> Result<String, AiError>;
}
