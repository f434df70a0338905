//! Decision records emitted for every accepted event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "APPROVE")]
    Approve,
    #[serde(rename = "MANUAL_REVIEW")]
    ManualReview,
    #[serde(rename = "BLOCK")]
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::ManualReview => "MANUAL_REVIEW",
            Self::Block => "BLOCK",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity grading shared by fraud patterns, velocity findings and
/// contributing factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Medium => 0.5,
            Self::High => 0.75,
            Self::Critical => 1.0,
        }
    }

    /// Grade a normalized [0,1] signal value.
    pub fn for_value(value: f64) -> Self {
        if value >= 0.8 {
            Self::Critical
        } else if value >= 0.55 {
            Self::High
        } else if value >= 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One piece of evidence behind a decision, ordered by descending impact in
/// the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub name: String,
    pub impact: f64,
    pub severity: Severity,
    pub evidence: String,
}

impl ContributingFactor {
    pub fn new(
        name: impl Into<String>,
        impact: f64,
        severity: Severity,
        evidence: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), impact, severity, evidence: evidence.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Completed,
    Failed,
    SkippedRateLimit,
}

/// Captured output of one escalated investigation. Role payloads are stored
/// as raw JSON so the record stays self-describing in the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    pub status: AgentRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruling: Option<serde_json::Value>,
    pub tool_calls: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentTrace {
    pub fn skipped_rate_limit() -> Self {
        Self {
            status: AgentRunStatus::SkippedRateLimit,
            investigation: None,
            risk_assessment: None,
            ruling: None,
            tool_calls: 0,
            elapsed_ms: 0,
            error: None,
        }
    }
}

/// The single record produced per accepted event, published to the decision
/// topic and written to the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub order_id: String,
    pub user_id: String,
    pub decision: Decision,
    pub risk_score: f64,
    pub confidence: f64,
    pub contributing_factors: Vec<ContributingFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_trace: Option<AgentTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: u64,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// Fallback record for a payload that failed schema validation.
    pub fn malformed(order_id: String, user_id: String, detail: String) -> Self {
        Self {
            order_id,
            user_id,
            decision: Decision::ManualReview,
            risk_score: 0.0,
            confidence: 0.0,
            contributing_factors: vec![ContributingFactor::new(
                "schema_validation",
                0.0,
                Severity::Low,
                detail,
            )],
            agent_trace: None,
            reason: Some("malformed_event".to_string()),
            elapsed_ms: 0,
            decided_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_serializes_upper_snake() {
        assert_eq!(serde_json::to_string(&Decision::ManualReview).unwrap(), "\"MANUAL_REVIEW\"");
        assert_eq!(serde_json::to_string(&Decision::Block).unwrap(), "\"BLOCK\"");
    }

    #[test]
    fn severity_grading() {
        assert_eq!(Severity::for_value(0.1), Severity::Low);
        assert_eq!(Severity::for_value(0.4), Severity::Medium);
        assert_eq!(Severity::for_value(0.6), Severity::High);
        assert_eq!(Severity::for_value(0.95), Severity::Critical);
        assert_eq!(Severity::Critical.weight(), 1.0);
    }

    #[test]
    fn malformed_record_routes_to_review() {
        let record =
            DecisionRecord::malformed("o1".into(), "unknown".into(), "missing amount".into());
        assert_eq!(record.decision, Decision::ManualReview);
        assert_eq!(record.reason.as_deref(), Some("malformed_event"));
        assert_eq!(record.confidence, 0.0);
    }
}
