// Language model abstraction
// Provider-neutral request type and error classification

pub mod gemini;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use gemini::GeminiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    QueryEnhancement,
    AnswerSynthesis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: CallKind,
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Rate limiting and transient outages are worth another attempt after a
    /// backoff; everything else fails the same way again.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unavailable(_))
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}
