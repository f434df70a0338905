//! Structured errors for tool execution.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{name}' not found in registry")]
    NotFound { name: String },

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("execution of '{tool}' failed: {message}")]
    ExecutionFailed { tool: String, message: String },

    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_args(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments { tool: tool.into(), reason: reason.into() }
    }

    pub fn execution_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed { tool: tool.into(), message: message.into() }
    }

    pub fn timeout(tool: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { tool: tool.into(), timeout_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_tool() {
        assert!(ToolError::not_found("velocity_check").to_string().contains("velocity_check"));
        assert!(ToolError::timeout("fraud_history", 20_000).to_string().contains("20000ms"));
        assert!(ToolError::invalid_args("similar_cases", "missing query")
            .to_string()
            .contains("missing query"));
    }
}
