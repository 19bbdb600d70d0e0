use async_trait::async_trait;
use enrich_core::RemoteCallResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
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
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Input for a single embedding call
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRequest {
    pub input_text: String,
    /// Upper bound on input tokens; longer input is truncated
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Remote embedding endpoint.
///
/// One call is one attempt. Retrying is left to
/// [`enrich_core::execute_with_retry`].
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, request: &EmbeddingRequest) -> RemoteCallResult<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// Remote chat-completion endpoint, one attempt per call.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> RemoteCallResult<String>;

    fn model_name(&self) -> &str;
}
