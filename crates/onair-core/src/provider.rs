use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CompletionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of a chat-completion prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Sampling bounds for a single completion call.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            max_tokens: 140,
        }
    }
}

/// Stateless completion collaborator: prompt in, text out.
///
/// Implementations must fail with a descriptive error on non-success
/// responses, timeouts, and empty results.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_wire_shape() {
        let msg = ChatMessage::system("You are DJ_CLAW.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "You are DJ_CLAW.");
    }

    #[test]
    fn completion_options_defaults() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.max_tokens, 140);
        assert!((opts.temperature - 0.9).abs() < f64::EPSILON);
    }
}
