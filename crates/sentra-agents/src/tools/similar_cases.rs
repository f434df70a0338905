//! Knowledge-base search for fraud patterns resembling the transaction.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use sentra_core::event::TransactionEvent;
use sentra_llm::tool::{Tool, ToolDefinition};
use sentra_llm::tool_error::ToolError;
use sentra_memory::knowledge::FraudKnowledgeBase;

const DEFINITION: ToolDefinition = ToolDefinition::new(
    "similar_cases",
    "Find known fraud patterns similar to this transaction; omit query to search with the transaction's own description",
    r#"{"type": "object", "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}}}"#,
);

pub struct SimilarCasesTool {
    knowledge: Arc<FraudKnowledgeBase>,
    event: TransactionEvent,
}

impl SimilarCasesTool {
    pub fn new(knowledge: Arc<FraudKnowledgeBase>, event: TransactionEvent) -> Self {
        Self { knowledge, event }
    }
}

#[async_trait]
impl Tool for SimilarCasesTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.event.describe());
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(5).min(20) as usize;

        let hits = self.knowledge.search(&query, limit);
        Ok(json!({
            "query": query,
            "count": hits.len(),
            "cases": hits.iter().map(|(pattern, similarity)| json!({
                "description": pattern.description,
                "fraud_type": pattern.metadata.fraud_type,
                "severity": pattern.metadata.severity,
                "source": pattern.metadata.source,
                "similarity": similarity,
            })).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_memory::embedding::TrigramEmbedder;

    fn event() -> TransactionEvent {
        TransactionEvent::from_json(
            br#"{
                "order_id": "o1", "user_id": "u1", "amount": 3.5,
                "timestamp": "2025-06-12T10:00:00Z", "payment_method": "credit_card",
                "currency": "USD", "shipping_country": "US", "billing_country": "US"
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn explicit_query_is_used() {
        let kb = Arc::new(FraudKnowledgeBase::new(Arc::new(TrigramEmbedder::new())));
        kb.seed_if_empty();
        let tool = SimilarCasesTool::new(kb, event());
        let out = tool
            .execute(json!({
                "query": "small card purchases under five dollars probing whether a stolen card is live"
            }))
            .await
            .unwrap();
        assert!(out["count"].as_u64().unwrap() >= 1);
        assert_eq!(out["cases"][0]["fraud_type"], "card_testing");
    }

    #[tokio::test]
    async fn defaults_to_event_description() {
        let kb = Arc::new(FraudKnowledgeBase::new(Arc::new(TrigramEmbedder::new())));
        let tool = SimilarCasesTool::new(kb, event());
        let out = tool.execute(json!({})).await.unwrap();
        assert!(out["query"].as_str().unwrap().contains("$3.50"));
    }
}
