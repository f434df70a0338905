//! Record the decision role's verdict.
//!
//! The only writing tool. Its output lands in the per-run ruling slot; the
//! runtime refuses to complete a decision role that never called it.

use async_trait::async_trait;
use serde_json::{json, Value};

use sentra_core::decision::Decision;
use sentra_llm::tool::{Tool, ToolDefinition};
use sentra_llm::tool_error::ToolError;

use crate::context::{RulingCall, RulingSlot};

const DEFINITION: ToolDefinition = ToolDefinition::new(
    "fraud_decision",
    "Record the final verdict for this transaction; must be called exactly once before finishing",
    r#"{"type": "object", "properties": {
        "order_id": {"type": "string"},
        "decision": {"type": "string", "enum": ["APPROVE", "MANUAL_REVIEW", "BLOCK"]},
        "confidence": {"type": "number"},
        "reasoning": {"type": "string"},
        "fraud_indicators": {"type": "array", "items": {"type": "string"}}
    }, "required": ["decision", "confidence", "reasoning"]}"#,
);

pub struct FraudDecisionTool {
    order_id: String,
    slot: RulingSlot,
}

impl FraudDecisionTool {
    pub fn new(order_id: String, slot: RulingSlot) -> Self {
        Self { order_id, slot }
    }
}

#[async_trait]
impl Tool for FraudDecisionTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        if let Some(order_id) = args.get("order_id").and_then(Value::as_str) {
            if order_id != self.order_id {
                return Err(ToolError::invalid_args(
                    "fraud_decision",
                    format!("order_id '{order_id}' does not match the transaction under review"),
                ));
            }
        }
        let decision = args.get("decision").and_then(Value::as_str).unwrap_or_default();
        if serde_json::from_value::<Decision>(json!(decision)).is_err() {
            return Err(ToolError::invalid_args(
                "fraud_decision",
                "decision must be APPROVE, MANUAL_REVIEW or BLOCK",
            ));
        }
        match args.get("confidence").and_then(Value::as_f64) {
            Some(c) if (0.0..=1.0).contains(&c) => Ok(()),
            _ => Err(ToolError::invalid_args(
                "fraud_decision",
                "confidence must be a number in [0, 1]",
            )),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let decision: Decision = serde_json::from_value(args["decision"].clone())?;
        let ruling = RulingCall {
            order_id: self.order_id.clone(),
            decision,
            confidence: args["confidence"].as_f64().unwrap_or(0.0),
            reasoning: args["reasoning"].as_str().unwrap_or_default().to_string(),
            fraud_indicators: args
                .get("fraud_indicators")
                .and_then(Value::as_array)
                .map(|items| {
                    items.iter().filter_map(Value::as_str).map(str::to_string).collect()
                })
                .unwrap_or_default(),
        };

        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ToolError::execution_failed("fraud_decision", "ruling slot poisoned"))?;
        if slot.is_some() {
            return Err(ToolError::invalid_args(
                "fraud_decision",
                "verdict already recorded for this investigation",
            ));
        }
        *slot = Some(ruling);

        Ok(json!({"recorded": true, "order_id": self.order_id, "decision": args["decision"]}))
    }
}
