//! Query a user's recorded fraud history.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use sentra_llm::tool::{Tool, ToolDefinition};
use sentra_llm::tool_error::ToolError;
use sentra_memory::store::MemoryStore;

const DEFINITION: ToolDefinition = ToolDefinition::new(
    "fraud_history",
    "Query the user's recorded fraud history: flag count, latest flag reason and recent manual reviews",
    r#"{"type": "object", "properties": {"user_id": {"type": "string"}}, "required": ["user_id"]}"#,
);

pub struct FraudHistoryTool {
    store: Arc<dyn MemoryStore>,
}

impl FraudHistoryTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FraudHistoryTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        if args.get("user_id").and_then(Value::as_str).is_none() {
            return Err(ToolError::invalid_args("fraud_history", "user_id is required"));
        }
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let user_id = args["user_id"].as_str().unwrap_or_default();
        let reputation = self
            .store
            .get_user_reputation(user_id)
            .await
            .map_err(|e| ToolError::execution_failed("fraud_history", e.to_string()))?;

        Ok(match reputation {
            Some(rep) => json!({
                "found": true,
                "user_id": user_id,
                "fraud_count": rep.fraud_count,
                "currently_flagged": rep.flagged,
                "latest_flag_reason": rep.flag_reason.map(|r| r.as_str()),
                "last_manual_review": rep.last_review_at.map(|at| at.to_rfc3339()),
            }),
            None => json!({
                "found": false,
                "user_id": user_id,
                "message": "no fraud history on record",
            }),
        })
    }
}
