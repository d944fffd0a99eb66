//! Text generation capability consumed by the orchestration core.
//!
//! The core treats the language-model provider as an opaque
//! `generate(system_prompt, messages) -> text` capability. Every call site
//! goes through [`generate_with_timeout`], which bounds the call and honors
//! a [`CancellationToken`], so a hung provider degrades into an ordinary
//! [`ProviderError`] instead of stalling a wave or phase.

mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use http::HttpTextGenerator;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// A request with one user message and provider-default sampling.
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: vec![ChatMessage::user(user_message)],
            temperature: None,
            max_tokens: None,
        }
    }

    /// Override the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the output token limit (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Failures of a provider call.
///
/// Always isolated to the step or phase call that issued the request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("provider quota exhausted: {0}")]
    Quota(String),

    #[error("could not parse provider response: {0}")]
    Parse(String),

    #[error("provider call timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("provider call cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// The opaque text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}

/// Run one generation bounded by `timeout` and `cancel`.
///
/// Cancellation wins over a concurrently completing call.
pub async fn generate_with_timeout(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, ProviderError> {
    if cancel.is_cancelled() {
        return Err(ProviderError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        outcome = tokio::time::timeout(timeout, generator.generate(request)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                after_secs: timeout.as_secs(),
            }),
        },
    }
}
