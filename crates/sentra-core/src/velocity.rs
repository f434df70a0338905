//! Velocity pattern detection.
//!
//! A pure function of the user's velocity window plus the current event;
//! the same inputs always produce the same findings.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Severity;
use crate::event::TransactionEvent;

/// One entry of a user's rolling velocity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub order_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

impl WindowEntry {
    pub fn from_event(event: &TransactionEvent) -> Self {
        Self {
            order_id: event.order_id.clone(),
            amount: event.amount,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityPattern {
    RapidFire,
    CardTesting,
    ElevatedFrequency,
}

impl VelocityPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidFire => "rapid_fire",
            Self::CardTesting => "card_testing",
            Self::ElevatedFrequency => "elevated_frequency",
        }
    }

    /// Contribution of the pattern to the fused velocity signal.
    pub fn weight(&self) -> f64 {
        match self {
            Self::RapidFire => 0.9,
            Self::CardTesting => 0.8,
            Self::ElevatedFrequency => 0.5,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::RapidFire => Severity::Critical,
            Self::CardTesting => Severity::High,
            Self::ElevatedFrequency => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityFinding {
    pub pattern: VelocityPattern,
    pub severity: Severity,
    pub evidence: Vec<String>,
}

const RAPID_FIRE_SPAN: i64 = 10; // seconds, inclusive
const RAPID_FIRE_COUNT: usize = 3;
const CARD_TESTING_MAX_AMOUNT: f64 = 5.0;
const CARD_TESTING_COUNT: usize = 3;
const CARD_TESTING_WINDOW_MIN: i64 = 5;
const ELEVATED_COUNT: usize = 10;
const ELEVATED_WINDOW_SEC: i64 = 3600;
const ELEVATED_P95_GAP_SEC: i64 = 30;

/// Run all velocity checks against the window plus the current event.
pub fn detect_velocity(window: &[WindowEntry], event: &TransactionEvent) -> Vec<VelocityFinding> {
    let mut entries: Vec<WindowEntry> = window
        .iter()
        .filter(|e| e.order_id != event.order_id)
        .cloned()
        .collect();
    entries.push(WindowEntry::from_event(event));
    entries.sort_by_key(|e| e.timestamp);

    let mut findings = Vec::new();
    if let Some(f) = check_rapid_fire(&entries) {
        findings.push(f);
    }
    if let Some(f) = check_card_testing(&entries, event.timestamp) {
        findings.push(f);
    }
    if let Some(f) = check_elevated_frequency(&entries, event.timestamp) {
        findings.push(f);
    }
    findings
}

/// Three or more events inside a ten-second span, span boundaries inclusive.
fn check_rapid_fire(entries: &[WindowEntry]) -> Option<VelocityFinding> {
    if entries.len() < RAPID_FIRE_COUNT {
        return None;
    }
    for chunk in entries.windows(RAPID_FIRE_COUNT) {
        let span = chunk[RAPID_FIRE_COUNT - 1].timestamp - chunk[0].timestamp;
        if span <= Duration::seconds(RAPID_FIRE_SPAN) {
            let evidence = chunk
                .iter()
                .map(|e| {
                    format!(
                        "order {} at {} (${:.2})",
                        e.order_id,
                        e.timestamp.to_rfc3339(),
                        e.amount
                    )
                })
                .collect();
            return Some(VelocityFinding {
                pattern: VelocityPattern::RapidFire,
                severity: VelocityPattern::RapidFire.severity(),
                evidence,
            });
        }
    }
    None
}

/// Three or more sub-$5 probes inside five minutes.
fn check_card_testing(
    entries: &[WindowEntry],
    now: DateTime<Utc>,
) -> Option<VelocityFinding> {
    let cutoff = now - Duration::minutes(CARD_TESTING_WINDOW_MIN);
    let probes: Vec<&WindowEntry> = entries
        .iter()
        .filter(|e| e.timestamp >= cutoff && e.amount < CARD_TESTING_MAX_AMOUNT)
        .collect();
    if probes.len() < CARD_TESTING_COUNT {
        return None;
    }
    let evidence = probes
        .iter()
        .map(|e| format!("probe {} for ${:.2} at {}", e.order_id, e.amount, e.timestamp.to_rfc3339()))
        .collect();
    Some(VelocityFinding {
        pattern: VelocityPattern::CardTesting,
        severity: VelocityPattern::CardTesting.severity(),
        evidence,
    })
}

/// Ten or more events in the trailing hour whose 95th-percentile
/// inter-arrival gap is under thirty seconds.
fn check_elevated_frequency(
    entries: &[WindowEntry],
    now: DateTime<Utc>,
) -> Option<VelocityFinding> {
    let cutoff = now - Duration::seconds(ELEVATED_WINDOW_SEC);
    let recent: Vec<&WindowEntry> = entries.iter().filter(|e| e.timestamp >= cutoff).collect();
    if recent.len() < ELEVATED_COUNT {
        return None;
    }
    let mut gaps: Vec<i64> = recent
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds())
        .collect();
    gaps.sort_unstable();
    let p95 = percentile(&gaps, 0.95)?;
    if p95 >= ELEVATED_P95_GAP_SEC {
        return None;
    }
    Some(VelocityFinding {
        pattern: VelocityPattern::ElevatedFrequency,
        severity: VelocityPattern::ElevatedFrequency.severity(),
        evidence: vec![format!(
            "{} events in the last hour, p95 inter-arrival gap {}s",
            recent.len(),
            p95
        )],
    })
}

fn percentile(sorted: &[i64], q: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::testutil::event;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 12, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn entry(order_id: &str, amount: f64, secs: i64) -> WindowEntry {
        WindowEntry { order_id: order_id.to_string(), amount, timestamp: at(secs) }
    }

    fn event_at(order_id: &str, amount: f64, secs: i64) -> crate::event::TransactionEvent {
        let mut e = event(order_id, "u1", amount);
        e.timestamp = at(secs);
        e
    }

    #[test]
    fn rapid_fire_on_three_in_ten_seconds() {
        let window = vec![entry("o1", 50.0, 0), entry("o2", 50.0, 4)];
        let findings = detect_velocity(&window, &event_at("o3", 50.0, 8));
        assert!(findings.iter().any(|f| f.pattern == VelocityPattern::RapidFire));
        let rapid = findings.iter().find(|f| f.pattern == VelocityPattern::RapidFire).unwrap();
        assert_eq!(rapid.evidence.len(), 3);
        assert_eq!(rapid.severity, Severity::Critical);
    }

    #[test]
    fn rapid_fire_span_is_inclusive() {
        let window = vec![entry("o1", 50.0, 0), entry("o2", 50.0, 5)];
        let findings = detect_velocity(&window, &event_at("o3", 50.0, 10));
        assert!(findings.iter().any(|f| f.pattern == VelocityPattern::RapidFire));
    }

    #[test]
    fn no_rapid_fire_past_the_span() {
        let window = vec![entry("o1", 50.0, 0), entry("o2", 50.0, 6)];
        let findings = detect_velocity(&window, &event_at("o3", 50.0, 11));
        assert!(!findings.iter().any(|f| f.pattern == VelocityPattern::RapidFire));
    }

    #[test]
    fn card_testing_on_three_small_probes() {
        let window = vec![entry("o1", 2.0, 0), entry("o2", 3.0, 120)];
        let findings = detect_velocity(&window, &event_at("o3", 4.0, 240));
        let hit = findings.iter().find(|f| f.pattern == VelocityPattern::CardTesting).unwrap();
        assert_eq!(hit.evidence.len(), 3);
    }

    #[test]
    fn card_testing_ignores_large_amounts() {
        let window = vec![entry("o1", 2.0, 0), entry("o2", 80.0, 120)];
        let findings = detect_velocity(&window, &event_at("o3", 4.0, 240));
        assert!(!findings.iter().any(|f| f.pattern == VelocityPattern::CardTesting));
    }

    #[test]
    fn elevated_frequency_needs_tight_gaps() {
        // 10 events 20 seconds apart: p95 gap 20s < 30s.
        let window: Vec<WindowEntry> =
            (0..9).map(|i| entry(&format!("o{i}"), 25.0, i * 20)).collect();
        let findings = detect_velocity(&window, &event_at("o9", 25.0, 180));
        assert!(findings.iter().any(|f| f.pattern == VelocityPattern::ElevatedFrequency));

        // Same count, one huge gap pushes p95 over the line.
        let mut sparse = window.clone();
        sparse[0].timestamp = at(-3000);
        let findings = detect_velocity(&sparse, &event_at("o9", 25.0, 180));
        assert!(!findings.iter().any(|f| f.pattern == VelocityPattern::ElevatedFrequency));
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let window = vec![entry("o1", 2.0, 0), entry("o2", 3.0, 3)];
        let ev = event_at("o3", 4.0, 6);
        let a = detect_velocity(&window, &ev);
        let b = detect_velocity(&window, &ev);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn duplicate_of_current_event_not_double_counted() {
        let window = vec![entry("o3", 50.0, 0), entry("o2", 50.0, 4)];
        let findings = detect_velocity(&window, &event_at("o3", 50.0, 8));
        assert!(!findings.iter().any(|f| f.pattern == VelocityPattern::RapidFire));
    }
}
