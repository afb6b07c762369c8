use async_trait::async_trait;

use murmur_core::types::Turn;

/// Request to a chat-completion provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// System prompt prepended ahead of the history.
    pub system: String,
    /// Conversation history, oldest first.
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Common interface for chat-completion backends.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for the full reply text.
    async fn complete(&self, req: &ChatRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}
