//! # Sentra LLM
//!
//! LLM plumbing for the agent runtime:
//! - [`LlmProvider`]: the provider seam, with an OpenAI-compatible HTTP
//!   implementation and a scripted mock for tests
//! - [`LlmRateLimiter`]: request-window and inter-call-gap limiting with a
//!   bounded cooperative wait
//! - the tool framework: [`Tool`], [`ToolRegistry`], [`ToolExecutor`]

pub mod executor;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod rate_limit;
pub mod tool;
pub mod tool_error;

pub use executor::ToolExecutor;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use provider::{LlmError, LlmProvider, LlmRequest, LlmResponse};
pub use rate_limit::{LimiterStats, LlmRateLimiter, RateLimitConfig, RateLimitError};
pub use tool::{Tool, ToolDefinition, ToolRegistry};
pub use tool_error::ToolError;
