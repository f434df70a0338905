//! Error taxonomy for the fraud pipeline.
//!
//! Detection stages never surface these to the orchestrator as hard errors;
//! they are converted to soft failures that reduce signal coverage. Only
//! [`PipelineError::Fatal`] escapes event processing.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retriable I/O failure against an external collaborator.
    #[error("transient I/O failure in {component}: {message}")]
    TransientIo { component: &'static str, message: String },

    /// The collaborator's circuit breaker is open; the call was never made.
    #[error("circuit open for {0}")]
    CircuitOpen(&'static str),

    /// The LLM rate limiter could not admit the call within its wait budget.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The event payload failed schema validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// An agent role produced unparsable output or misused its tools.
    #[error("agent output malformed: {0}")]
    AgentMalformed(String),

    /// An event with this order id was already decided.
    #[error("duplicate event {0}")]
    DuplicateEvent(String),

    /// Unrecoverable configuration or dependency failure.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn transient(component: &'static str, message: impl Into<String>) -> Self {
        Self::TransientIo { component, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether the retry policy may re-attempt the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    /// Whether the failure is absorbed as a soft failure (signal contributes
    /// zero, coverage shrinks) rather than propagated.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::TransientIo { .. } | Self::CircuitOpen(_) | Self::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_and_soft() {
        let err = PipelineError::transient("memory", "connection reset");
        assert!(err.is_retryable());
        assert!(err.is_soft());
    }

    #[test]
    fn fatal_is_neither() {
        let err = PipelineError::fatal("bad config");
        assert!(!err.is_retryable());
        assert!(!err.is_soft());
    }

    #[test]
    fn circuit_open_is_soft_not_retryable() {
        let err = PipelineError::CircuitOpen("knowledge");
        assert!(err.is_soft());
        assert!(!err.is_retryable());
    }
}
