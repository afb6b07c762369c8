use tracing::warn;

use murmur_core::config::CompletionConfig;
use murmur_core::types::Turn;

use crate::provider::{ChatProvider, ChatRequest, ProviderError};

/// Front door to the chat-completion API.
///
/// Owns the provider plus the request parameters and the default system
/// prompt. Upstream failures never escape: they are logged and replaced by a
/// user-facing apology, so the dispatcher only ever sees "some text" or
/// "no reply".
pub struct CompletionClient {
    provider: Box<dyn ChatProvider>,
    default_prompt: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl CompletionClient {
    pub fn new(
        provider: Box<dyn ChatProvider>,
        config: &CompletionConfig,
        default_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            default_prompt: default_prompt.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Generate a reply for `history` under the given system prompt
    /// (falling back to the default prompt when unset).
    ///
    /// `None` means "no reply": the provider answered with an empty body.
    /// Errors come back as apology text, not as `None`.
    pub async fn generate(&self, prompt: Option<&str>, history: &[Turn]) -> Option<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            system: prompt.unwrap_or(&self.default_prompt).to_string(),
            messages: history.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        match self.provider.complete(&req).await {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(text),
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "completion failed");
                Some(apology(&e))
            }
        }
    }
}

/// User-facing substitute for an upstream failure.
fn apology(err: &ProviderError) -> String {
    match err {
        ProviderError::Unavailable(_) => {
            "Sorry, the AI service is not available right now. Please ask the administrator to configure it.".to_string()
        }
        ProviderError::Api { status, .. } => {
            format!("The AI service ran into a problem ({status}). Please try again later.")
        }
        ProviderError::Parse(_) => {
            "The AI failed to generate a reply. Please try again later.".to_string()
        }
        ProviderError::Http(_) => {
            "Sorry, something went wrong while reaching the AI service. Please try again later."
                .to_string()
        }
    }
}
