//! Per-escalation context shared with the roles and their tools.

use std::sync::{Arc, Mutex};

use sentra_core::decision::Decision;
use sentra_core::event::TransactionEvent;
use sentra_core::features::RollingStats;
use sentra_core::fusion::{ReputationView, SimilarCase};
use sentra_core::velocity::VelocityFinding;

/// Everything the pre-agent pipeline learned about the event. Lives only
/// for one escalation; nothing here is persisted except through the
/// decision record.
#[derive(Debug, Clone)]
pub struct EscalationContext {
    pub event: TransactionEvent,
    pub prior_score: f64,
    pub prior_confidence: f64,
    pub coverage: f64,
    pub ml_score: Option<f64>,
    pub velocity: Vec<VelocityFinding>,
    pub reputation: ReputationView,
    pub similar: Vec<SimilarCase>,
    pub stats: Option<RollingStats>,
}

/// The verdict recorded by the decision role through `fraud_decision`.
#[derive(Debug, Clone)]
pub struct RulingCall {
    pub order_id: String,
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    pub fraud_indicators: Vec<String>,
}

/// Shared slot the `fraud_decision` tool writes into; the runtime checks
/// it after the decision role finishes.
pub type RulingSlot = Arc<Mutex<Option<RulingCall>>>;

pub fn new_ruling_slot() -> RulingSlot {
    Arc::new(Mutex::new(None))
}
