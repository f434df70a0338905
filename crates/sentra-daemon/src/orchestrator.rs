//! The per-event decision pipeline.
//!
//! Stage order is fixed: reputation lookup, velocity, ML, similarity
//! query, fusion, triage, optional agent escalation, memory and knowledge
//! updates, then emission. Stages 1-4 run sequentially so a score is
//! reproducible against the same memory snapshot; each stage carries its
//! own deadline and degrades to a soft failure instead of erroring.

use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use sentra_agents::{AgentRuntime, EscalationContext};
use sentra_core::circuit::{BreakerRegistry, CircuitBreaker};
use sentra_core::config::Settings;
use sentra_core::decision::{
    AgentRunStatus, AgentTrace, ContributingFactor, Decision, DecisionRecord, Severity,
};
use sentra_core::event::TransactionEvent;
use sentra_core::features::{extract, rolling_stats, RollingStats};
use sentra_core::fusion::{
    apply_overrides, fuse, triage, FusedScore, OverrideInputs, ReputationView, SignalInputs,
    SimilarCase, Triage,
};
use sentra_core::metrics::{PipelineMetrics, Stage};
use sentra_core::ml::ScoringModel;
use sentra_core::reputation::FlagReason;
use sentra_core::velocity::{detect_velocity, VelocityFinding, VelocityPattern, WindowEntry};
use sentra_core::PipelineError;
use sentra_memory::knowledge::{FraudKnowledgeBase, PatternMetadata, PatternSource};
use sentra_memory::store::MemoryStore;

const KNOWLEDGE_TOP_K: usize = 5;
const LEARN_THRESHOLD: f64 = 0.9;

/// One decision plus whether it was served from the dedup set.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub record: DecisionRecord,
    pub duplicate: bool,
}

pub struct Orchestrator {
    store: Arc<dyn MemoryStore>,
    knowledge: Arc<FraudKnowledgeBase>,
    model: Arc<dyn ScoringModel>,
    agents: Option<Arc<AgentRuntime>>,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<PipelineMetrics>,
    settings: Arc<Settings>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        knowledge: Arc<FraudKnowledgeBase>,
        model: Arc<dyn ScoringModel>,
        agents: Option<Arc<AgentRuntime>>,
        breakers: Arc<BreakerRegistry>,
        metrics: Arc<PipelineMetrics>,
        settings: Arc<Settings>,
    ) -> Self {
        Self { store, knowledge, model, agents, breakers, metrics, settings }
    }

    /// Decide a raw bus payload. Validation failures become MANUAL_REVIEW
    /// records with the payload preserved; this never errors.
    pub async fn process_raw(&self, payload: &[u8]) -> ProcessOutcome {
        match TransactionEvent::from_json(payload) {
            Ok(event) => self.process_event(event).await,
            Err(err) => {
                self.metrics.invalid_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let raw: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);
                let order_id = raw
                    .get("order_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let user_id = raw
                    .get("user_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                tracing::warn!(order = %order_id, error = %err, "rejecting malformed event");
                let mut record = DecisionRecord::malformed(
                    order_id.clone(),
                    user_id,
                    format!("{err}; raw: {}", String::from_utf8_lossy(payload)),
                );
                record.decided_at = Utc::now();
                self.metrics.record_decision(record.decision);
                if order_id != "unknown" {
                    let _ = self
                        .store
                        .put_decision(&order_id, &record, self.settings.ttls.dedup)
                        .await;
                }
                ProcessOutcome { record, duplicate: false }
            }
        }
    }

    pub async fn process_event(&self, event: TransactionEvent) -> ProcessOutcome {
        let started = Instant::now();

        // Replays return the original record without re-running anything.
        if let Some(prior) = self
            .guarded(&self.breakers.memory, self.settings.deadlines.memory, Stage::Reputation, {
                let store = self.store.clone();
                let order_id = event.order_id.clone();
                async move {
                    store
                        .get_decision(&order_id)
                        .await
                        .map_err(|e| PipelineError::transient("memory", e.to_string()))
                }
            })
            .await
            .flatten()
        {
            tracing::info!(order = %event.order_id, "duplicate event, returning prior decision");
            self.metrics.duplicates.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return ProcessOutcome { record: prior, duplicate: true };
        }

        let record = match timeout(self.settings.deadlines.pipeline, self.run_pipeline(&event))
            .await
        {
            Ok(record) => record,
            Err(_) => {
                tracing::error!(order = %event.order_id, "pipeline deadline exceeded");
                insufficient_signal_record(&event)
            }
        };

        let mut record = record;
        record.elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_decision(record.decision);
        self.metrics.observe_stage(Stage::Total, started.elapsed());

        let _ = self
            .store
            .put_decision(&event.order_id, &record, self.settings.ttls.dedup)
            .await;

        ProcessOutcome { record, duplicate: false }
    }

    async fn run_pipeline(&self, event: &TransactionEvent) -> DecisionRecord {
        // Stage 1: reputation lookup.
        let reputation = self
            .guarded(&self.breakers.memory, self.settings.deadlines.memory, Stage::Reputation, {
                let store = self.store.clone();
                let user_id = event.user_id.clone();
                let ip = event.ip_address.clone();
                async move {
                    let user = store
                        .get_user_reputation(&user_id)
                        .await
                        .map_err(|e| PipelineError::transient("memory", e.to_string()))?;
                    let ip = match ip {
                        Some(addr) => store
                            .get_ip_reputation(&addr)
                            .await
                            .map_err(|e| PipelineError::transient("memory", e.to_string()))?,
                        None => None,
                    };
                    Ok(ReputationView { user, ip })
                }
            })
            .await;

        // Stage 2: velocity window and pattern detection.
        let window = self
            .guarded(&self.breakers.memory, self.settings.deadlines.memory, Stage::Velocity, {
                let store = self.store.clone();
                let user_id = event.user_id.clone();
                let span = self.settings.velocity_window;
                async move {
                    store
                        .get_velocity_window(&user_id, span)
                        .await
                        .map_err(|e| PipelineError::transient("memory", e.to_string()))
                }
            })
            .await;
        let stats = window.as_deref().map(rolling_stats);
        let findings: Option<Vec<VelocityFinding>> =
            window.as_deref().map(|w| detect_velocity(w, event));
        if let Some(findings) = &findings {
            for finding in findings {
                self.metrics.velocity_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if finding.pattern == VelocityPattern::CardTesting {
                    self.metrics
                        .card_testing_hits
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }

        // Stage 3: model score. Evaluation is pure; the guard only adds
        // the deadline and breaker accounting.
        let features = extract(event, stats.as_ref());
        let ml_score = self
            .guarded(&self.breakers.ml, self.settings.deadlines.ml, Stage::Ml, {
                let model = self.model.clone();
                async move { Ok(model.predict_score(&features)) }
            })
            .await;

        // Stage 4: similarity query against the knowledge base.
        let similar = self
            .guarded(
                &self.breakers.knowledge,
                self.settings.deadlines.knowledge,
                Stage::Knowledge,
                {
                    let knowledge = self.knowledge.clone();
                    let query = event.describe();
                    async move {
                        let hits = knowledge.search(&query, KNOWLEDGE_TOP_K);
                        Ok(hits
                            .into_iter()
                            .map(|(pattern, similarity)| SimilarCase {
                                fraud_type: pattern.metadata.fraud_type,
                                severity: pattern.metadata.severity,
                                similarity: f64::from(similarity),
                                description: pattern.description,
                            })
                            .collect::<Vec<_>>())
                    }
                },
            )
            .await;

        // Stage 5: fusion.
        let fused = fuse(&SignalInputs {
            event,
            now: Utc::now(),
            ml: ml_score,
            velocity: findings.as_deref(),
            reputation: reputation.as_ref(),
            similar: similar.as_deref(),
            stats: stats.as_ref(),
        });

        if fused.coverage == 0.0 {
            let record = insufficient_signal_record(event);
            self.finish(event, &fused, record.decision, None).await;
            return record;
        }

        // Stage 6: triage, stage 7: optional escalation.
        let agents_available = self.agents.is_some() && self.settings.agents.enabled;
        let verdict = triage(
            &fused,
            self.settings.thresholds.block,
            self.settings.thresholds.review,
            agents_available,
        );

        let (mut decision, agent_trace) = match verdict {
            Triage::Decide(decision) => (decision, None),
            Triage::RunAgents => self.escalate(event, &fused, &reputation, &findings, &similar, &stats).await,
        };

        // Deterministic overrides outrank both triage and the agents.
        let first_time_user = stats.map(|s| s.count == 0).unwrap_or(false);
        let (final_decision, fired) = apply_overrides(
            decision,
            &fused,
            OverrideInputs { first_time_user, amount: event.amount },
        );
        decision = final_decision;

        let mut factors = fused.factors.clone();
        for name in &fired {
            factors.push(ContributingFactor::new(
                *name,
                0.0,
                Severity::High,
                "deterministic override",
            ));
        }

        let record = DecisionRecord {
            order_id: event.order_id.clone(),
            user_id: event.user_id.clone(),
            decision,
            risk_score: fused.score,
            confidence: fused.confidence,
            contributing_factors: factors,
            agent_trace,
            reason: None,
            elapsed_ms: 0,
            decided_at: Utc::now(),
        };

        // Stage 8: memory and knowledge updates.
        self.finish(event, &fused, decision, findings.as_deref()).await;

        record
    }

    async fn escalate(
        &self,
        event: &TransactionEvent,
        fused: &FusedScore,
        reputation: &Option<ReputationView>,
        findings: &Option<Vec<VelocityFinding>>,
        similar: &Option<Vec<SimilarCase>>,
        stats: &Option<RollingStats>,
    ) -> (Decision, Option<AgentTrace>) {
        // Triage only hands us RunAgents when the score cleared the block
        // threshold, so the pre-agent fallback is Block.
        let fallback = Decision::Block;
        let Some(runtime) = &self.agents else {
            return (fallback, None);
        };

        if runtime.is_saturated().await {
            tracing::warn!(order = %event.order_id, "rate limiter saturated, skipping escalation");
            self.metrics.agent_skips.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return (fallback, Some(AgentTrace::skipped_rate_limit()));
        }
        if self.breakers.llm.admit().await.is_err() {
            self.metrics.agent_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let mut trace = AgentTrace::skipped_rate_limit();
            trace.status = AgentRunStatus::Failed;
            trace.error = Some("llm circuit open".to_string());
            return (fallback, Some(trace));
        }

        self.metrics.agent_runs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let started = Instant::now();
        let ctx = EscalationContext {
            event: event.clone(),
            prior_score: fused.score,
            prior_confidence: fused.confidence,
            coverage: fused.coverage,
            ml_score: fused.signals.ml,
            velocity: findings.clone().unwrap_or_default(),
            reputation: reputation.clone().unwrap_or_default(),
            similar: similar.clone().unwrap_or_default(),
            stats: *stats,
        };

        let outcome = runtime.investigate(&ctx, self.store.clone(), self.knowledge.clone()).await;
        self.metrics.observe_stage(Stage::Agents, started.elapsed());

        match outcome.trace.status {
            AgentRunStatus::Completed => {
                self.breakers.llm.record_success().await;
                let decision = outcome.ruling.as_ref().map(|r| r.decision).unwrap_or(fallback);
                (decision, Some(outcome.trace))
            }
            _ => {
                self.breakers.llm.record_failure().await;
                self.metrics.agent_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                (fallback, Some(outcome.trace))
            }
        }
    }

    /// Stage 8 side effects: velocity append, flags, learned patterns.
    async fn finish(
        &self,
        event: &TransactionEvent,
        fused: &FusedScore,
        decision: Decision,
        findings: Option<&[VelocityFinding]>,
    ) {
        let started = Instant::now();

        if let Err(err) = self
            .store
            .record_transaction(&event.user_id, WindowEntry::from_event(event))
            .await
        {
            tracing::warn!(order = %event.order_id, error = %err, "velocity append failed");
        }

        match decision {
            Decision::Block => {
                // The flag names the pattern that led the block; score- or
                // agent-led blocks record confirmed fraud directly. Every
                // one of these reasons arms the hard-flag short circuit.
                let reason = findings
                    .unwrap_or(&[])
                    .iter()
                    .find_map(|finding| match finding.pattern {
                        VelocityPattern::RapidFire => Some(FlagReason::VelocityAbuse),
                        VelocityPattern::CardTesting => Some(FlagReason::CardTesting),
                        VelocityPattern::ElevatedFrequency => None,
                    })
                    .unwrap_or(FlagReason::ConfirmedFraud);
                let _ = self
                    .store
                    .flag_user(&event.user_id, reason, self.settings.ttls.user_flag)
                    .await;

                if fused.score >= LEARN_THRESHOLD {
                    if let Some(ip) = &event.ip_address {
                        let _ = self.store.flag_ip(ip, self.settings.ttls.ip_flag).await;
                    }
                    self.learn_pattern(event, fused, findings);
                }
            }
            Decision::ManualReview => {
                let _ = self
                    .store
                    .flag_user(&event.user_id, FlagReason::ManualReview, self.settings.ttls.user_flag)
                    .await;
                let _ = self.store.record_review(&event.user_id, Utc::now()).await;
            }
            Decision::Approve => {}
        }

        self.metrics.observe_stage(Stage::MemoryWrite, started.elapsed());
    }

    /// Insert the transaction as a learned pattern after a confirmed
    /// high-score block.
    fn learn_pattern(
        &self,
        event: &TransactionEvent,
        fused: &FusedScore,
        findings: Option<&[VelocityFinding]>,
    ) {
        let fraud_type = findings
            .and_then(|f| f.first())
            .map(|f| f.pattern.as_str().to_string())
            .unwrap_or_else(|| "ml_detected".to_string());

        let mut description = format!(
            "fraud score {:.2}, amount ${:.2}, payment {}",
            fused.score, event.amount, event.payment_method
        );
        if let Some(age) = event.account_age_days {
            description.push_str(&format!(", account age {age} days"));
        }
        if event.country_mismatch() {
            description.push_str(", shipping and billing countries differ");
        }
        description.push_str(&format!(", pattern {fraud_type}"));

        let severity = if fused.score >= 0.95 { Severity::Critical } else { Severity::High };
        let inserted = self.knowledge.insert(
            &description,
            PatternMetadata {
                fraud_type,
                severity,
                example_amount_range: amount_range(event.amount).to_string(),
                source: PatternSource::Learned,
                created_at: Utc::now(),
            },
        );
        if inserted {
            self.metrics.learned_patterns.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::info!(order = %event.order_id, "learned pattern indexed");
        }
    }

    /// Run a stage behind its circuit breaker and deadline. `None` means
    /// the stage soft-failed and its signal contributes nothing.
    async fn guarded<T, F>(
        &self,
        breaker: &CircuitBreaker,
        deadline: Duration,
        stage: Stage,
        fut: F,
    ) -> Option<T>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        if breaker.admit().await.is_err() {
            self.metrics.soft_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(stage = stage.as_str(), "circuit open, stage skipped");
            return None;
        }
        let started = Instant::now();
        let result = timeout(deadline, fut).await;
        self.metrics.observe_stage(stage, started.elapsed());
        match result {
            Ok(Ok(value)) => {
                breaker.record_success().await;
                Some(value)
            }
            Ok(Err(err)) => {
                breaker.record_failure().await;
                self.metrics.soft_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!(stage = stage.as_str(), error = %err, "stage soft-failed");
                None
            }
            Err(_) => {
                breaker.record_failure().await;
                self.metrics.soft_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!(stage = stage.as_str(), "stage deadline exceeded");
                None
            }
        }
    }
}

fn insufficient_signal_record(event: &TransactionEvent) -> DecisionRecord {
    DecisionRecord {
        order_id: event.order_id.clone(),
        user_id: event.user_id.clone(),
        decision: Decision::ManualReview,
        risk_score: 0.0,
        confidence: 0.0,
        contributing_factors: Vec::new(),
        agent_trace: None,
        reason: Some("insufficient_signal".to_string()),
        elapsed_ms: 0,
        decided_at: Utc::now(),
    }
}

fn amount_range(amount: f64) -> &'static str {
    if amount < 5.0 {
        "0-5"
    } else if amount < 20.0 {
        "5-20"
    } else if amount < 100.0 {
        "20-100"
    } else if amount < 500.0 {
        "100-500"
    } else if amount < 2000.0 {
        "500-2000"
    } else {
        "2000+"
    }
}
