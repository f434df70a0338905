//! LLM provider trait and request/response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider rate limited")]
    RateLimited,
    #[error("provider not available")]
    NotAvailable,
    #[error("input too large: {0} bytes exceeds maximum {1} bytes")]
    InputTooLarge(usize, usize),
}

impl LlmError {
    /// Failures that should trip the provider's circuit breaker.
    pub fn is_availability_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::NotAvailable | Self::RateLimited)
    }
}

/// Prompt size ceilings; anything larger is rejected before the wire.
pub const MAX_PROMPT_SIZE: usize = 100 * 1024;
pub const MAX_SYSTEM_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// Role instructions for this turn.
    pub system: String,
    /// Turn payload, including any accumulated tool transcript.
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmRequest {
    /// Investigation turns run cold so replays stay comparable.
    pub fn for_role(system: &str, prompt: &str) -> Self {
        Self {
            system: system.to_string(),
            prompt: prompt.to_string(),
            temperature: 0.0,
            max_tokens: 2048,
        }
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.prompt.len() > MAX_PROMPT_SIZE {
            return Err(LlmError::InputTooLarge(self.prompt.len(), MAX_PROMPT_SIZE));
        }
        if self.system.len() > MAX_SYSTEM_SIZE {
            return Err(LlmError::InputTooLarge(self.system.len(), MAX_SYSTEM_SIZE));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u32>,
    pub latency_ms: u64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}
