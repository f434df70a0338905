//! Timeout-guarded tool execution.

use serde_json::Value;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::tool::ToolRegistry;
use crate::tool_error::ToolError;

pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Look up, validate and run a tool under its own timeout.
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            warn!(tool = tool_name, "tool not found");
            ToolError::not_found(tool_name)
        })?;

        tool.validate(&args)?;

        let budget = tool.timeout();
        let start = Instant::now();
        let output = timeout(budget, tool.execute(args))
            .await
            .map_err(|_| ToolError::timeout(tool_name, budget.as_millis() as u64))??;

        debug!(
            tool = tool_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool executed"
        );
        Ok(output)
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor").field("tools", &self.registry.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolDefinition};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowTool {
        definition: ToolDefinition,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!({}))
        }
    }

    struct PickyTool {
        definition: ToolDefinition,
    }

    #[async_trait]
    impl Tool for PickyTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        fn validate(&self, args: &Value) -> Result<(), ToolError> {
            if args.get("user_id").is_none() {
                return Err(ToolError::invalid_args("picky", "user_id required"));
            }
            Ok(())
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let executor = ToolExecutor::new(ToolRegistry::new());
        let result = executor.execute("nope", serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool {
            definition: ToolDefinition::new("slow", "sleeps", r#"{"type": "object"}"#),
        }));
        let executor = ToolExecutor::new(registry);
        let result = executor.execute("slow", serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn validation_runs_before_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PickyTool {
            definition: ToolDefinition::new("picky", "validates", r#"{"type": "object"}"#),
        }));
        let executor = ToolExecutor::new(registry);
        let bad = executor.execute("picky", serde_json::json!({})).await;
        assert!(matches!(bad, Err(ToolError::InvalidArguments { .. })));
        let good = executor
            .execute("picky", serde_json::json!({"user_id": "u1"}))
            .await
            .unwrap();
        assert_eq!(good["user_id"], "u1");
    }
}
