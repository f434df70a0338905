//! Tool definitions and registry for LLM function calling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::tool_error::ToolError;

/// Metadata describing a tool's interface: its name, what it does, and a
/// JSON Schema for its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static str,
}

impl ToolDefinition {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        parameters: &'static str,
    ) -> Self {
        Self { name, description, parameters }
    }

    /// Schema block handed to the model inside role prompts.
    pub fn to_schema(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": serde_json::from_str::<Value>(self.parameters)
                .unwrap_or(serde_json::json!({"type": "object"}))
        })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;

    /// Pre-execution argument validation; override for checks beyond the
    /// schema.
    fn validate(&self, _args: &Value) -> Result<(), ToolError> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}

/// Name-keyed tool lookup; duplicate names are rejected to keep one
/// implementation per contract.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.definition().name.to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "duplicate tool registration skipped");
            return false;
        }
        self.tools.insert(name, tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn schemas(&self) -> Vec<Value> {
        let mut defs: Vec<&ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by_key(|d| d.name);
        defs.iter().map(|d| d.to_schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        definition: ToolDefinition,
    }

    impl EchoTool {
        fn new(name: &'static str) -> Self {
            Self {
                definition: ToolDefinition::new(name, "echoes input", r#"{"type": "object"}"#),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> &ToolDefinition {
            &self.definition
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(serde_json::json!({"echo": args}))
        }
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(EchoTool::new("echo"))));
        assert!(!registry.register(Arc::new(EchoTool::new("echo"))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn schemas_are_sorted_and_parseable() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new("zeta")));
        registry.register(Arc::new(EchoTool::new("alpha")));
        let schemas = registry.schemas();
        assert_eq!(schemas[0]["name"], "alpha");
        assert_eq!(schemas[1]["name"], "zeta");
        assert_eq!(schemas[0]["parameters"]["type"], "object");
    }
}
