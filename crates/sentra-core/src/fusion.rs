//! Score fusion, confidence, triage and deterministic overrides.
//!
//! Five normalized signals are fused into one risk score:
//! ML 0.25, velocity 0.20, historical 0.30, similar cases 0.15, transaction
//! anomalies 0.10. A signal whose source did not respond contributes zero
//! and shrinks coverage.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::{ContributingFactor, Decision, Severity};
use crate::event::TransactionEvent;
use crate::features::RollingStats;
use crate::reputation::{IpReputation, UserReputation};
use crate::velocity::{VelocityFinding, VelocityPattern};

pub const WEIGHT_ML: f64 = 0.25;
pub const WEIGHT_VELOCITY: f64 = 0.20;
pub const WEIGHT_HISTORICAL: f64 = 0.30;
pub const WEIGHT_SIMILAR: f64 = 0.15;
pub const WEIGHT_ANOMALY: f64 = 0.10;

const SIMILARITY_FLOOR: f64 = 0.7;
const REVIEW_LOOKBACK_DAYS: i64 = 7;
const CONFIDENCE_FLOOR: f64 = 0.6;
const FIRST_TIME_AMOUNT: f64 = 500.0;
const HIGH_SEVERITY_OVERRIDE_COUNT: usize = 3;
const AGENT_COVERAGE_FLOOR: f64 = 0.6;

/// A knowledge-base hit above the similarity floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarCase {
    pub fraud_type: String,
    pub severity: Severity,
    pub similarity: f64,
    pub description: String,
}

/// Reputation read results from stage 1. `None` fields mean no record, not
/// a failed read; a failed read makes the whole input `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReputationView {
    pub user: Option<UserReputation>,
    pub ip: Option<IpReputation>,
}

/// Raw stage outputs feeding fusion. Each `Option` is `None` when the stage
/// soft-failed (timeout, open circuit, transient error).
pub struct SignalInputs<'a> {
    pub event: &'a TransactionEvent,
    pub now: DateTime<Utc>,
    pub ml: Option<f64>,
    pub velocity: Option<&'a [VelocityFinding]>,
    pub reputation: Option<&'a ReputationView>,
    pub similar: Option<&'a [SimilarCase]>,
    pub stats: Option<&'a RollingStats>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalValues {
    pub ml: Option<f64>,
    pub velocity: Option<f64>,
    pub historical: Option<f64>,
    pub similar: Option<f64>,
    pub anomaly: Option<f64>,
}

impl SignalValues {
    fn as_array(&self) -> [Option<f64>; 5] {
        [self.ml, self.velocity, self.historical, self.similar, self.anomaly]
    }
}

/// Fusion output consumed by triage, the overrides and the decision record.
#[derive(Debug, Clone)]
pub struct FusedScore {
    pub score: f64,
    pub confidence: f64,
    pub coverage: f64,
    pub agreement: f64,
    pub evidence_strength: f64,
    pub signals: SignalValues,
    pub factors: Vec<ContributingFactor>,
    pub hard_flagged: bool,
    pub rapid_fire: bool,
    pub prior_confirmed_fraud: bool,
    pub high_severity_factors: usize,
}

pub fn fuse(inputs: &SignalInputs<'_>) -> FusedScore {
    let mut factors: Vec<ContributingFactor> = Vec::new();

    let ml = inputs.ml;
    if let Some(score) = ml {
        factors.push(ContributingFactor::new(
            "ml_score",
            WEIGHT_ML * score,
            Severity::for_value(score),
            format!("model anomaly score {score:.3}"),
        ));
    }

    let mut rapid_fire = false;
    let velocity = inputs.velocity.map(|findings| {
        let mut strongest = 0.0_f64;
        for finding in findings {
            strongest = strongest.max(finding.pattern.weight());
            if finding.pattern == VelocityPattern::RapidFire {
                rapid_fire = true;
            }
            // Each evidence point stands on its own as a factor; three
            // card-testing probes are three pieces of high-severity
            // evidence, not one.
            for point in &finding.evidence {
                factors.push(ContributingFactor::new(
                    finding.pattern.as_str(),
                    WEIGHT_VELOCITY * finding.pattern.weight(),
                    finding.severity,
                    point.clone(),
                ));
            }
        }
        strongest
    });

    let mut hard_flagged = false;
    let mut prior_confirmed_fraud = false;
    let historical = inputs.reputation.map(|view| {
        let mut value = 0.0_f64;
        if let Some(user) = &view.user {
            if user.fraud_flagged() {
                // A live block-derived flag short-circuits triage; a
                // review flag only raises the historical signal.
                prior_confirmed_fraud = true;
                hard_flagged = true;
            }
            if user.flagged {
                value = value.max(1.0);
                let severity =
                    if user.fraud_flagged() { Severity::Critical } else { Severity::High };
                factors.push(ContributingFactor::new(
                    "user_flagged",
                    WEIGHT_HISTORICAL,
                    severity,
                    format!(
                        "user flagged ({})",
                        user.flag_reason.map(|r| r.as_str()).unwrap_or("unspecified")
                    ),
                ));
            }
            if user.fraud_count >= 3 {
                value = value.max(1.0);
                factors.push(ContributingFactor::new(
                    "repeat_offender",
                    WEIGHT_HISTORICAL,
                    Severity::Critical,
                    format!("{} prior fraud flags", user.fraud_count),
                ));
            }
            if !user.flagged
                && user.fraud_count < 3
                && user.reviewed_within(inputs.now, Duration::days(REVIEW_LOOKBACK_DAYS))
            {
                value = value.max(0.4);
                factors.push(ContributingFactor::new(
                    "recent_manual_review",
                    WEIGHT_HISTORICAL * 0.4,
                    Severity::Medium,
                    "manual review within the last 7 days",
                ));
            }
        }
        if let Some(ip) = &view.ip {
            if ip.flagged {
                hard_flagged = true;
                value = value.max(0.7);
                factors.push(ContributingFactor::new(
                    "ip_flagged",
                    WEIGHT_HISTORICAL * 0.7,
                    Severity::High,
                    format!("ip linked to {} fraud cases", ip.fraud_case_count),
                ));
            }
        }
        value
    });

    let similar = inputs.similar.map(|hits| {
        let mut weighted = 0.0_f64;
        let mut denom = 0.0_f64;
        for hit in hits.iter().filter(|h| h.similarity >= SIMILARITY_FLOOR) {
            let sev = hit.severity.weight();
            weighted += hit.similarity * sev;
            denom += sev;
            factors.push(ContributingFactor::new(
                format!("similar_case:{}", hit.fraud_type),
                WEIGHT_SIMILAR * hit.similarity,
                hit.severity,
                hit.description.clone(),
            ));
        }
        if denom > 0.0 {
            weighted / denom
        } else {
            0.0
        }
    });

    // Anomaly checks need the rolling window; without it the whole signal
    // is treated as unavailable.
    let anomaly = inputs.stats.map(|stats| {
        let mut value = 0.0_f64;
        if inputs.event.country_mismatch() {
            value += 0.3;
            factors.push(ContributingFactor::new(
                "geo_mismatch",
                WEIGHT_ANOMALY * 0.3,
                Severity::Medium,
                format!(
                    "shipping {} vs billing {}",
                    inputs.event.shipping_country, inputs.event.billing_country
                ),
            ));
        }
        if stats.count >= 2
            && stats.std_amount > 0.0
            && inputs.event.amount > stats.mean_amount + 3.0 * stats.std_amount
        {
            value += 0.4;
            factors.push(ContributingFactor::new(
                "amount_outlier",
                WEIGHT_ANOMALY * 0.4,
                Severity::High,
                format!(
                    "${:.2} exceeds rolling mean ${:.2} by more than 3 sigma",
                    inputs.event.amount, stats.mean_amount
                ),
            ));
        }
        if inputs.event.account_age_days == Some(0) && inputs.event.amount > 500.0 {
            value += 0.3;
            factors.push(ContributingFactor::new(
                "new_account_high_amount",
                WEIGHT_ANOMALY * 0.3,
                Severity::High,
                format!("account under a day old spending ${:.2}", inputs.event.amount),
            ));
        }
        value.min(1.0)
    });

    let signals = SignalValues { ml, velocity, historical, similar, anomaly };
    let values = signals.as_array();

    let score = (WEIGHT_ML * ml.unwrap_or(0.0)
        + WEIGHT_VELOCITY * velocity.unwrap_or(0.0)
        + WEIGHT_HISTORICAL * historical.unwrap_or(0.0)
        + WEIGHT_SIMILAR * similar.unwrap_or(0.0)
        + WEIGHT_ANOMALY * anomaly.unwrap_or(0.0))
    .min(1.0);

    let coverage = values.iter().filter(|v| v.is_some()).count() as f64 / values.len() as f64;
    let agreement = agreement_of(&values);
    let evidence_strength = if factors.is_empty() {
        0.0
    } else {
        factors.iter().map(|f| f.severity.weight()).sum::<f64>() / factors.len() as f64
    };
    let confidence =
        (0.4 * agreement + 0.3 * coverage + 0.3 * evidence_strength).clamp(0.0, 1.0);

    let high_severity_factors =
        factors.iter().filter(|f| f.severity >= Severity::High).count();

    factors.sort_by(|a, b| b.impact.partial_cmp(&a.impact).unwrap_or(std::cmp::Ordering::Equal));

    FusedScore {
        score,
        confidence,
        coverage,
        agreement,
        evidence_strength,
        signals,
        factors,
        hard_flagged,
        rapid_fire,
        prior_confirmed_fraud,
        high_severity_factors,
    }
}

/// One minus the standard deviation of the contributing values, normalized
/// by the largest spread possible for values in [0, 1].
fn agreement_of(values: &[Option<f64>; 5]) -> f64 {
    let present: Vec<f64> = values.iter().map(|v| v.unwrap_or(0.0)).collect();
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (1.0 - var.sqrt() / 0.5).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    RunAgents,
    Decide(Decision),
}

pub fn triage(
    fused: &FusedScore,
    block_threshold: f64,
    review_threshold: f64,
    agents_available: bool,
) -> Triage {
    if fused.hard_flagged {
        return Triage::Decide(Decision::Block);
    }
    if fused.score >= block_threshold {
        if fused.coverage >= AGENT_COVERAGE_FLOOR && agents_available {
            return Triage::RunAgents;
        }
        return Triage::Decide(Decision::Block);
    }
    if fused.score >= review_threshold {
        return Triage::Decide(Decision::ManualReview);
    }
    Triage::Decide(Decision::Approve)
}

/// Extra state the overrides need beyond the fusion output.
#[derive(Debug, Clone, Copy)]
pub struct OverrideInputs {
    pub first_time_user: bool,
    pub amount: f64,
}

/// Apply the deterministic post-decision rules. Block rules outrank review
/// rules. Returns the final decision and the names of the rules that fired.
pub fn apply_overrides(
    decision: Decision,
    fused: &FusedScore,
    inputs: OverrideInputs,
) -> (Decision, Vec<&'static str>) {
    let mut fired = Vec::new();
    let mut result = decision;

    if fused.confidence < CONFIDENCE_FLOOR {
        fired.push("low_confidence");
        result = Decision::ManualReview;
    }
    if inputs.first_time_user && inputs.amount > FIRST_TIME_AMOUNT {
        fired.push("first_time_high_amount");
        result = Decision::ManualReview;
    }

    if fused.prior_confirmed_fraud {
        fired.push("prior_confirmed_fraud");
        result = Decision::Block;
    }
    if fused.high_severity_factors >= HIGH_SEVERITY_OVERRIDE_COUNT {
        fired.push("high_severity_accumulation");
        result = Decision::Block;
    }
    if fused.rapid_fire {
        fired.push("rapid_fire_velocity");
        result = Decision::Block;
    }

    (result, fired)
}
