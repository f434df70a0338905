//! Tool implementations exposed to the investigation roles.
//!
//! Thin wrappers over the memory store, knowledge base and detectors; the
//! tools read, only `fraud_decision` writes (into the per-run ruling slot).

mod fraud_decision;
mod fraud_history;
mod similar_cases;
mod transaction_analysis;
mod user_reputation;
mod velocity_check;

pub use fraud_decision::FraudDecisionTool;
pub use fraud_history::FraudHistoryTool;
pub use similar_cases::SimilarCasesTool;
pub use transaction_analysis::TransactionAnalysisTool;
pub use user_reputation::UserReputationTool;
pub use velocity_check::VelocityCheckTool;

use std::sync::Arc;

use sentra_llm::tool::ToolRegistry;
use sentra_memory::knowledge::FraudKnowledgeBase;
use sentra_memory::store::MemoryStore;

use crate::context::{EscalationContext, RulingSlot};

/// Tools available to the investigation role.
pub fn investigation_registry(
    ctx: &EscalationContext,
    store: Arc<dyn MemoryStore>,
    knowledge: Arc<FraudKnowledgeBase>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FraudHistoryTool::new(store.clone())));
    registry.register(Arc::new(UserReputationTool::new(store.clone())));
    registry.register(Arc::new(SimilarCasesTool::new(knowledge, ctx.event.clone())));
    registry.register(Arc::new(VelocityCheckTool::new(store, ctx.event.clone())));
    registry.register(Arc::new(TransactionAnalysisTool::new(ctx.clone())));
    registry
}

/// The decision role only records verdicts.
pub fn decision_registry(ctx: &EscalationContext, slot: RulingSlot) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FraudDecisionTool::new(ctx.event.order_id.clone(), slot)));
    registry
}
