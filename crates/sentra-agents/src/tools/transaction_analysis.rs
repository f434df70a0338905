//! Deep-dive on the transaction payload and rolling statistics.

use async_trait::async_trait;
use serde_json::{json, Value};

use sentra_llm::tool::{Tool, ToolDefinition};
use sentra_llm::tool_error::ToolError;

use crate::context::EscalationContext;

const DEFINITION: ToolDefinition = ToolDefinition::new(
    "transaction_analysis",
    "Analyze the transaction itself: amount versus the user's rolling history, account age, geography and payment method",
    r#"{"type": "object", "properties": {}}"#,
);

pub struct TransactionAnalysisTool {
    ctx: EscalationContext,
}

impl TransactionAnalysisTool {
    pub fn new(ctx: EscalationContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for TransactionAnalysisTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        let event = &self.ctx.event;
        let mut observations = Vec::new();

        if event.country_mismatch() {
            observations.push(format!(
                "shipping country {} differs from billing country {}",
                event.shipping_country, event.billing_country
            ));
        }
        if let Some(age) = event.account_age_days {
            if age < 7 {
                observations.push(format!("account is only {age} days old"));
            }
        }
        if let Some(stats) = &self.ctx.stats {
            if stats.count > 0 && event.amount > stats.mean_amount * 3.0 {
                observations.push(format!(
                    "amount ${:.2} is more than triple the rolling mean ${:.2}",
                    event.amount, stats.mean_amount
                ));
            }
        }

        Ok(json!({
            "order_id": event.order_id,
            "amount": event.amount,
            "currency": event.currency,
            "payment_method": event.payment_method.as_str(),
            "account_age_days": event.account_age_days,
            "country_mismatch": event.country_mismatch(),
            "rolling": self.ctx.stats.as_ref().map(|s| json!({
                "mean_amount": s.mean_amount,
                "std_amount": s.std_amount,
                "count": s.count,
            })),
            "ml_score": self.ctx.ml_score,
            "pre_agent_score": self.ctx.prior_score,
            "observations": observations,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::features::RollingStats;
    use sentra_core::fusion::ReputationView;

    fn ctx() -> EscalationContext {
        let mut event = sentra_core::event::TransactionEvent::from_json(
            br#"{
                "order_id": "o1", "user_id": "u1", "amount": 600.0,
                "timestamp": "2025-06-12T10:00:00Z", "payment_method": "credit_card",
                "currency": "USD", "shipping_country": "RO", "billing_country": "US",
                "account_age_days": 2
            }"#,
        )
        .unwrap();
        event.account_age_days = Some(2);
        EscalationContext {
            event,
            prior_score: 0.75,
            prior_confidence: 0.7,
            coverage: 1.0,
            ml_score: Some(0.6),
            velocity: Vec::new(),
            reputation: ReputationView::default(),
            similar: Vec::new(),
            stats: Some(RollingStats { mean_amount: 80.0, std_amount: 20.0, count: 4 }),
        }
    }

    #[tokio::test]
    async fn flags_mismatch_young_account_and_outlier() {
        let tool = TransactionAnalysisTool::new(ctx());
        let out = tool.execute(json!({})).await.unwrap();
        let observations = out["observations"].as_array().unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(out["country_mismatch"], true);
        assert_eq!(out["pre_agent_score"], 0.75);
    }
}
