//! Velocity detection over the user's live window.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use sentra_core::event::TransactionEvent;
use sentra_core::velocity::detect_velocity;
use sentra_llm::tool::{Tool, ToolDefinition};
use sentra_llm::tool_error::ToolError;
use sentra_memory::store::MemoryStore;

const DEFINITION: ToolDefinition = ToolDefinition::new(
    "velocity_check",
    "Run velocity detection (rapid-fire, card-testing, elevated frequency) for the transaction's user",
    r#"{"type": "object", "properties": {"window_seconds": {"type": "integer"}}}"#,
);

pub struct VelocityCheckTool {
    store: Arc<dyn MemoryStore>,
    event: TransactionEvent,
}

impl VelocityCheckTool {
    pub fn new(store: Arc<dyn MemoryStore>, event: TransactionEvent) -> Self {
        Self { store, event }
    }
}

#[async_trait]
impl Tool for VelocityCheckTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let window_seconds =
            args.get("window_seconds").and_then(Value::as_u64).unwrap_or(3600).min(86_400);
        let window = self
            .store
            .get_velocity_window(&self.event.user_id, Duration::from_secs(window_seconds))
            .await
            .map_err(|e| ToolError::execution_failed("velocity_check", e.to_string()))?;

        let findings = detect_velocity(&window, &self.event);
        Ok(json!({
            "user_id": self.event.user_id,
            "window_size": window.len(),
            "patterns": findings.iter().map(|f| json!({
                "pattern": f.pattern.as_str(),
                "severity": f.severity,
                "weight": f.pattern.weight(),
                "evidence": f.evidence,
            })).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentra_core::velocity::WindowEntry;
    use sentra_memory::store::InMemoryStore;

    #[tokio::test]
    async fn surfaces_rapid_fire_from_store() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        for i in 0..2 {
            store
                .record_transaction(
                    "u1",
                    WindowEntry {
                        order_id: format!("o{i}"),
                        amount: 50.0,
                        timestamp: now - chrono::Duration::seconds(8 - i * 4),
                    },
                )
                .await
                .unwrap();
        }
        let mut event = TransactionEvent::from_json(
            br#"{
                "order_id": "o9", "user_id": "u1", "amount": 50.0,
                "timestamp": "2025-06-12T10:00:00Z", "payment_method": "debit_card",
                "currency": "USD", "shipping_country": "US", "billing_country": "US"
            }"#,
        )
        .unwrap();
        event.timestamp = now;

        let tool = VelocityCheckTool::new(store, event);
        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out["window_size"], 2);
        let patterns: Vec<&str> = out["patterns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["pattern"].as_str().unwrap())
            .collect();
        assert!(patterns.contains(&"rapid_fire"));
    }
}
