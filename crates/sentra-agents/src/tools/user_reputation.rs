//! Live user and IP reputation lookup.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use sentra_llm::tool::{Tool, ToolDefinition};
use sentra_llm::tool_error::ToolError;
use sentra_memory::store::MemoryStore;

const DEFINITION: ToolDefinition = ToolDefinition::new(
    "user_reputation",
    "Check whether the user or an IP address currently carries a fraud flag",
    r#"{"type": "object", "properties": {"user_id": {"type": "string"}, "ip_address": {"type": "string"}}, "required": ["user_id"]}"#,
);

pub struct UserReputationTool {
    store: Arc<dyn MemoryStore>,
}

impl UserReputationTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UserReputationTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        if args.get("user_id").and_then(Value::as_str).is_none() {
            return Err(ToolError::invalid_args("user_reputation", "user_id is required"));
        }
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let user_id = args["user_id"].as_str().unwrap_or_default();
        let user = self
            .store
            .get_user_reputation(user_id)
            .await
            .map_err(|e| ToolError::execution_failed("user_reputation", e.to_string()))?;

        let ip = match args.get("ip_address").and_then(Value::as_str) {
            Some(addr) => self
                .store
                .get_ip_reputation(addr)
                .await
                .map_err(|e| ToolError::execution_failed("user_reputation", e.to_string()))?,
            None => None,
        };

        Ok(json!({
            "user": {
                "user_id": user_id,
                "flagged": user.as_ref().map(|u| u.flagged).unwrap_or(false),
                "flag_reason": user.as_ref().and_then(|u| u.flag_reason).map(|r| r.as_str()),
                "fraud_count": user.as_ref().map(|u| u.fraud_count).unwrap_or(0),
            },
            "ip": ip.map(|rep| json!({
                "flagged": rep.flagged,
                "fraud_case_count": rep.fraud_case_count,
                "last_seen": rep.last_seen.to_rfc3339(),
            })),
        }))
    }
}
