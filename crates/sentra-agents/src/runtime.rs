//! The three-role investigation state machine.
//!
//! Init -> Investigating -> Scoring -> Deciding -> Done, with Failed on
//! malformed output or an exhausted budget. Each role is one model turn
//! that may interleave tool calls; the wire protocol is a single JSON
//! object per reply: `{"tool": name, "args": {...}}` or `{"final": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::timeout_at;

use sentra_core::config::AgentSettings;
use sentra_core::decision::{AgentRunStatus, AgentTrace, Decision};
use sentra_core::fusion::{WEIGHT_ANOMALY, WEIGHT_HISTORICAL, WEIGHT_ML, WEIGHT_SIMILAR, WEIGHT_VELOCITY};
use sentra_llm::executor::ToolExecutor;
use sentra_llm::provider::{LlmError, LlmProvider, LlmRequest};
use sentra_llm::rate_limit::{LlmRateLimiter, RateLimitError};
use sentra_memory::knowledge::FraudKnowledgeBase;
use sentra_memory::store::MemoryStore;

use crate::context::{new_ruling_slot, EscalationContext, RulingCall};
use crate::prompts::{DECISION_PROMPT, INVESTIGATION_PROMPT, REPLY_PROTOCOL, RISK_PROMPT};
use crate::tools::{decision_registry, investigation_registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigationPhase {
    Init,
    Investigating,
    Scoring,
    Deciding,
    Done,
    Failed,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("llm rate limited")]
    RateLimited,
    #[error("provider failure: {0}")]
    Provider(#[from] LlmError),
    #[error("malformed role output: {0}")]
    Malformed(String),
    #[error("budget exhausted: {0}")]
    BudgetExhausted(&'static str),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStrength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub red_flags: Vec<String>,
    pub historical_context: String,
    #[serde(default)]
    pub similar_cases: Vec<String>,
    pub velocity_findings: String,
    pub risk_factors: Vec<String>,
    pub evidence_strength: EvidenceStrength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub ml: f64,
    pub velocity: f64,
    pub historical: f64,
    pub similar_cases: f64,
    pub anomalies: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub fraud_probability: f64,
    pub breakdown: ScoreBreakdown,
    pub confidence: f64,
    pub top_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRuling {
    pub decision: Decision,
    pub justification: String,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
}

/// Result of one escalation. `ruling` is present only when the run
/// completed and the decision role recorded its verdict.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub trace: AgentTrace,
    pub ruling: Option<RulingCall>,
}

pub struct AgentRuntime {
    provider: Arc<dyn LlmProvider>,
    limiter: Arc<LlmRateLimiter>,
    settings: AgentSettings,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        limiter: Arc<LlmRateLimiter>,
        settings: AgentSettings,
    ) -> Self {
        Self { provider, limiter, settings }
    }

    pub fn limiter(&self) -> &LlmRateLimiter {
        &self.limiter
    }

    /// Whether escalation should be skipped outright instead of stalling a
    /// worker on the rate limiter.
    pub async fn is_saturated(&self) -> bool {
        self.limiter.is_saturated().await
    }

    /// Drive the full Investigation -> Risk -> Decision sequence. Never
    /// panics or errors out: failures come back as a trace with
    /// `status = Failed` and the orchestrator keeps its triage result.
    pub async fn investigate(
        &self,
        ctx: &EscalationContext,
        store: Arc<dyn MemoryStore>,
        knowledge: Arc<FraudKnowledgeBase>,
    ) -> AgentOutcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.run_timeout;
        let mut trace = AgentTrace {
            status: AgentRunStatus::Failed,
            investigation: None,
            risk_assessment: None,
            ruling: None,
            tool_calls: 0,
            elapsed_ms: 0,
            error: None,
        };
        let mut phase = InvestigationPhase::Init;

        let outcome = self
            .run_sequence(ctx, store, knowledge, deadline, &mut trace, &mut phase)
            .await;

        trace.elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(ruling) => {
                trace.status = AgentRunStatus::Completed;
                AgentOutcome { trace, ruling: Some(ruling) }
            }
            Err(err) => {
                tracing::warn!(
                    order = %ctx.event.order_id,
                    phase = ?phase,
                    error = %err,
                    "investigation failed, falling back to triage result"
                );
                trace.status = AgentRunStatus::Failed;
                trace.error = Some(err.to_string());
                AgentOutcome { trace, ruling: None }
            }
        }
    }

    async fn run_sequence(
        &self,
        ctx: &EscalationContext,
        store: Arc<dyn MemoryStore>,
        knowledge: Arc<FraudKnowledgeBase>,
        deadline: tokio::time::Instant,
        trace: &mut AgentTrace,
        phase: &mut InvestigationPhase,
    ) -> Result<RulingCall, AgentError> {
        *phase = InvestigationPhase::Investigating;
        let investigation_tools =
            ToolExecutor::new(investigation_registry(ctx, store, knowledge));
        let report: InvestigationReport = self
            .run_role(
                INVESTIGATION_PROMPT,
                investigation_payload(ctx),
                Some(&investigation_tools),
                deadline,
                trace,
            )
            .await?;
        trace.investigation = Some(serde_json::to_value(&report)?);

        *phase = InvestigationPhase::Scoring;
        let risk: RiskAssessment = self
            .run_role(RISK_PROMPT, risk_payload(ctx, &report), None, deadline, trace)
            .await?;
        validate_risk(&risk)?;
        trace.risk_assessment = Some(serde_json::to_value(&risk)?);

        *phase = InvestigationPhase::Deciding;
        let slot = new_ruling_slot();
        let decision_tools = ToolExecutor::new(decision_registry(ctx, slot.clone()));
        let ruling: FinalRuling = self
            .run_role(
                DECISION_PROMPT,
                decision_payload(ctx, &report, &risk),
                Some(&decision_tools),
                deadline,
                trace,
            )
            .await?;
        trace.ruling = Some(serde_json::to_value(&ruling)?);

        // An unrecorded verdict is tool misuse: the role was told the
        // decision does not exist until fraud_decision persists it.
        let recorded = slot
            .lock()
            .map_err(|_| AgentError::Malformed("ruling slot poisoned".into()))?
            .clone()
            .ok_or_else(|| {
                AgentError::Malformed("decision role finished without calling fraud_decision".into())
            })?;

        *phase = InvestigationPhase::Done;
        Ok(recorded)
    }

    /// One role: turns of model replies, executing tool calls until the
    /// role produces its final payload or runs out of budget.
    async fn run_role<T: serde::de::DeserializeOwned>(
        &self,
        role_prompt: &str,
        payload: Value,
        tools: Option<&ToolExecutor>,
        deadline: tokio::time::Instant,
        trace: &mut AgentTrace,
    ) -> Result<T, AgentError> {
        let system = match tools {
            Some(executor) => format!(
                "{role_prompt}\n\nAvailable tools:\n{}\n\n{REPLY_PROTOCOL}",
                serde_json::to_string_pretty(&executor.registry().schemas())?,
            ),
            None => format!("{role_prompt}\n\n{REPLY_PROTOCOL}"),
        };

        let mut transcript = String::new();
        let mut role_tool_calls = 0u32;

        loop {
            let prompt = if transcript.is_empty() {
                payload.to_string()
            } else {
                format!("{payload}\n\nTool results so far:\n{transcript}")
            };

            self.limiter
                .acquire()
                .await
                .map_err(|_: RateLimitError| AgentError::RateLimited)?;

            let request = LlmRequest::for_role(&system, &prompt);
            let response = timeout_at(deadline, self.provider.complete(request))
                .await
                .map_err(|_| AgentError::BudgetExhausted("wall clock"))??;

            let reply = extract_json(&response.content).ok_or_else(|| {
                AgentError::Malformed(format!(
                    "no JSON object in reply: {}",
                    truncate(&response.content, 120)
                ))
            })?;

            if let Some(final_payload) = reply.get("final") {
                return serde_json::from_value(final_payload.clone())
                    .map_err(|e| AgentError::Malformed(format!("final payload: {e}")));
            }

            let Some(tool_name) = reply.get("tool").and_then(Value::as_str) else {
                return Err(AgentError::Malformed(
                    "reply is neither a tool call nor a final answer".into(),
                ));
            };
            let Some(executor) = tools else {
                return Err(AgentError::Malformed(format!(
                    "role has no tools but called '{tool_name}'"
                )));
            };
            if role_tool_calls >= self.settings.max_tool_calls {
                return Err(AgentError::BudgetExhausted("tool calls"));
            }
            role_tool_calls += 1;
            trace.tool_calls += 1;

            let args = reply.get("args").cloned().unwrap_or_else(|| json!({}));
            let entry = match timeout_at(deadline, executor.execute(tool_name, args)).await {
                Err(_) => return Err(AgentError::BudgetExhausted("wall clock")),
                Ok(Ok(output)) => json!({"tool": tool_name, "output": output}),
                // Tool errors go back to the model; it may recover or
                // choose a different tool.
                Ok(Err(err)) => json!({"tool": tool_name, "error": err.to_string()}),
            };
            transcript.push_str(&format!("{entry}\n"));
        }
    }
}

fn validate_risk(risk: &RiskAssessment) -> Result<(), AgentError> {
    if !(0.0..=1.0).contains(&risk.fraud_probability) {
        return Err(AgentError::Malformed("fraud_probability outside [0, 1]".into()));
    }
    if !(0.0..=1.0).contains(&risk.confidence) {
        return Err(AgentError::Malformed("confidence outside [0, 1]".into()));
    }
    let defaults = [
        ("ml", risk.breakdown.ml, WEIGHT_ML),
        ("velocity", risk.breakdown.velocity, WEIGHT_VELOCITY),
        ("historical", risk.breakdown.historical, WEIGHT_HISTORICAL),
        ("similar_cases", risk.breakdown.similar_cases, WEIGHT_SIMILAR),
        ("anomalies", risk.breakdown.anomalies, WEIGHT_ANOMALY),
    ];
    for (name, weight, default) in defaults {
        if (weight - default).abs() > 0.05 + 1e-9 {
            return Err(AgentError::Malformed(format!(
                "breakdown weight '{name}' = {weight} drifts more than 0.05 from {default}"
            )));
        }
    }
    Ok(())
}

fn investigation_payload(ctx: &EscalationContext) -> Value {
    json!({
        "task": "Investigate this transaction for fraud using your tools before reporting.",
        "transaction": ctx.event,
        "ml_score": ctx.ml_score,
        "pre_agent_score": ctx.prior_score,
        "coverage": ctx.coverage,
        "velocity_findings": ctx.velocity,
        "reputation": ctx.reputation,
        "similar_cases": ctx.similar,
        "rolling_stats": ctx.stats.as_ref().map(|s| json!({
            "mean_amount": s.mean_amount,
            "std_amount": s.std_amount,
            "count": s.count,
        })),
    })
}

fn risk_payload(ctx: &EscalationContext, report: &InvestigationReport) -> Value {
    json!({
        "task": "Quantify the fraud probability for this transaction using the scoring framework.",
        "transaction": ctx.event,
        "ml_score": ctx.ml_score,
        "pre_agent_score": ctx.prior_score,
        "investigation_report": report,
    })
}

fn decision_payload(ctx: &EscalationContext, report: &InvestigationReport, risk: &RiskAssessment) -> Value {
    json!({
        "task": "Make the final decision and record it with fraud_decision before answering.",
        "transaction": ctx.event,
        "investigation_report": report,
        "risk_assessment": risk,
        "pre_agent_score": ctx.prior_score,
        "pre_agent_confidence": ctx.prior_confidence,
    })
}

/// Pull the first balanced JSON object out of a reply that may carry prose
/// or fencing around it.
fn extract_json(content: &str) -> Option<Value> {
    let bytes = content.as_bytes();
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&content[start..=start + offset]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::config::Settings;
    use sentra_core::features::RollingStats;
    use sentra_core::fusion::ReputationView;
    use sentra_llm::mock::MockProvider;
    use sentra_llm::rate_limit::{LlmRateLimiter, RateLimitConfig};
    use sentra_memory::embedding::TrigramEmbedder;
    use sentra_memory::store::InMemoryStore;

    fn context() -> EscalationContext {
        let event = sentra_core::event::TransactionEvent::from_json(
            br#"{
                "order_id": "esc-1", "user_id": "u-esc", "amount": 640.0,
                "timestamp": "2025-06-12T10:00:00Z", "payment_method": "credit_card",
                "currency": "USD", "shipping_country": "RO", "billing_country": "US",
                "account_age_days": 3
            }"#,
        )
        .unwrap();
        EscalationContext {
            event,
            prior_score: 0.74,
            prior_confidence: 0.68,
            coverage: 1.0,
            ml_score: Some(0.62),
            velocity: Vec::new(),
            reputation: ReputationView::default(),
            similar: Vec::new(),
            stats: Some(RollingStats::default()),
        }
    }

    fn runtime(responses: Vec<String>) -> AgentRuntime {
        let mut settings = Settings::default().agents;
        settings.run_timeout = std::time::Duration::from_secs(5);
        AgentRuntime::new(
            Arc::new(MockProvider::new(responses)),
            Arc::new(LlmRateLimiter::new(RateLimitConfig {
                max_per_minute: 1000,
                min_gap: std::time::Duration::ZERO,
                max_wait: std::time::Duration::from_secs(1),
            })),
            settings,
        )
    }

    fn investigation_final() -> String {
        json!({"final": {
            "red_flags": ["new account", "geo mismatch"],
            "historical_context": "no prior history",
            "similar_cases": ["new_account_large_amount"],
            "velocity_findings": "none detected",
            "risk_factors": ["account age", "amount"],
            "evidence_strength": "moderate"
        }})
        .to_string()
    }

    fn risk_final(probability: f64) -> String {
        json!({"final": {
            "fraud_probability": probability,
            "breakdown": {"ml": 0.25, "velocity": 0.20, "historical": 0.30,
                           "similar_cases": 0.15, "anomalies": 0.10},
            "confidence": 0.8,
            "top_factors": ["account age", "amount", "geo mismatch"]
        }})
        .to_string()
    }

    fn decision_tool_call(decision: &str) -> String {
        json!({"tool": "fraud_decision", "args": {
            "decision": decision,
            "confidence": 0.8,
            "reasoning": "risk assessment supports it",
            "fraud_indicators": ["account age"]
        }})
        .to_string()
    }

    fn decision_final(decision: &str) -> String {
        json!({"final": {
            "decision": decision,
            "justification": "probability and confidence in the block band",
            "indicators": ["account age"],
            "next_actions": ["notify user"]
        }})
        .to_string()
    }

    async fn run(runtime: &AgentRuntime) -> AgentOutcome {
        let ctx = context();
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let kb = Arc::new(FraudKnowledgeBase::new(Arc::new(TrigramEmbedder::new())));
        runtime.investigate(&ctx, store, kb).await
    }

    #[tokio::test]
    async fn full_sequence_completes_with_recorded_ruling() {
        let rt = runtime(vec![
            investigation_final(),
            risk_final(0.86),
            decision_tool_call("BLOCK"),
            decision_final("BLOCK"),
        ]);
        let outcome = run(&rt).await;
        assert_eq!(outcome.trace.status, AgentRunStatus::Completed);
        let ruling = outcome.ruling.unwrap();
        assert_eq!(ruling.decision, Decision::Block);
        assert_eq!(outcome.trace.tool_calls, 1);
        assert!(outcome.trace.investigation.is_some());
        assert!(outcome.trace.risk_assessment.is_some());
    }

    #[tokio::test]
    async fn investigation_may_use_tools_first() {
        let rt = runtime(vec![
            json!({"tool": "user_reputation", "args": {"user_id": "u-esc"}}).to_string(),
            json!({"tool": "velocity_check", "args": {}}).to_string(),
            investigation_final(),
            risk_final(0.75),
            decision_tool_call("MANUAL_REVIEW"),
            decision_final("MANUAL_REVIEW"),
        ]);
        let outcome = run(&rt).await;
        assert_eq!(outcome.trace.status, AgentRunStatus::Completed);
        assert_eq!(outcome.trace.tool_calls, 3);
        assert_eq!(outcome.ruling.unwrap().decision, Decision::ManualReview);
    }

    #[tokio::test]
    async fn missing_fraud_decision_call_fails_the_run() {
        let rt = runtime(vec![
            investigation_final(),
            risk_final(0.86),
            decision_final("BLOCK"),
        ]);
        let outcome = run(&rt).await;
        assert_eq!(outcome.trace.status, AgentRunStatus::Failed);
        assert!(outcome.ruling.is_none());
        assert!(outcome.trace.error.unwrap().contains("fraud_decision"));
    }

    #[tokio::test]
    async fn garbage_output_fails_the_run() {
        let rt = runtime(vec!["I think this looks fraudulent, maybe?".to_string()]);
        let outcome = run(&rt).await;
        assert_eq!(outcome.trace.status, AgentRunStatus::Failed);
    }

    #[tokio::test]
    async fn drifted_risk_weights_fail_the_run() {
        let bad_risk = json!({"final": {
            "fraud_probability": 0.8,
            "breakdown": {"ml": 0.40, "velocity": 0.20, "historical": 0.15,
                           "similar_cases": 0.15, "anomalies": 0.10},
            "confidence": 0.8,
            "top_factors": ["a", "b", "c"]
        }})
        .to_string();
        let rt = runtime(vec![investigation_final(), bad_risk]);
        let outcome = run(&rt).await;
        assert_eq!(outcome.trace.status, AgentRunStatus::Failed);
        assert!(outcome.trace.error.unwrap().contains("ml"));
    }

    #[tokio::test]
    async fn tool_budget_exhaustion_fails_the_run() {
        let mut responses =
            vec![json!({"tool": "velocity_check", "args": {}}).to_string(); 20];
        responses.push(investigation_final());
        let rt = runtime(responses);
        let outcome = run(&rt).await;
        assert_eq!(outcome.trace.status, AgentRunStatus::Failed);
        assert!(outcome.trace.error.unwrap().contains("budget"));
    }

    #[test]
    fn extract_json_handles_fencing_and_noise() {
        let wrapped = "Here is my answer:\n```json\n{\"final\": {\"a\": \"b { c }\"}}\n```";
        let value = extract_json(wrapped).unwrap();
        assert_eq!(value["final"]["a"], "b { c }");
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{\"unterminated\": ").is_none());
    }
}
