pub mod client;
pub mod deepseek;
pub mod provider;

pub use client::CompletionClient;
pub use deepseek::DeepSeekProvider;
pub use provider::{ChatProvider, ChatRequest, ProviderError};
