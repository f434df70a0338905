//! # Sentra Agents
//!
//! The LLM-driven investigation invoked for ambiguous high-risk events.
//! Three roles run in fixed order, each a single model turn that may call
//! tools: Investigation gathers evidence, Risk quantifies it, Decision
//! rules and records its verdict through the `fraud_decision` tool.

pub mod context;
pub mod prompts;
pub mod runtime;
pub mod tools;

pub use context::{EscalationContext, RulingCall};
pub use runtime::{
    AgentError, AgentOutcome, AgentRuntime, EvidenceStrength, FinalRuling, InvestigationPhase,
    InvestigationReport, RiskAssessment, ScoreBreakdown,
};
