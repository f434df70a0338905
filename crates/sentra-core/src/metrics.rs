//! Pipeline metrics with Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::decision::Decision;

/// Upper bounds of the latency buckets, in milliseconds.
const BUCKET_BOUNDS_MS: [u64; 11] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reputation,
    Velocity,
    Ml,
    Knowledge,
    Agents,
    MemoryWrite,
    Persist,
    Total,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Reputation,
        Stage::Velocity,
        Stage::Ml,
        Stage::Knowledge,
        Stage::Agents,
        Stage::MemoryWrite,
        Stage::Persist,
        Stage::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reputation => "reputation",
            Self::Velocity => "velocity",
            Self::Ml => "ml",
            Self::Knowledge => "knowledge",
            Self::Agents => "agents",
            Self::MemoryWrite => "memory_write",
            Self::Persist => "persist",
            Self::Total => "total",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let idx = BUCKET_BOUNDS_MS.iter().position(|&b| ms <= b).unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String, stage: &str) {
        let mut cumulative = 0;
        for (i, bound) in BUCKET_BOUNDS_MS.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            out.push_str(&format!(
                "sentra_stage_latency_ms_bucket{{stage=\"{stage}\",le=\"{bound}\"}} {cumulative}\n"
            ));
        }
        cumulative += self.buckets[BUCKET_BOUNDS_MS.len()].load(Ordering::Relaxed);
        out.push_str(&format!(
            "sentra_stage_latency_ms_bucket{{stage=\"{stage}\",le=\"+Inf\"}} {cumulative}\n"
        ));
        out.push_str(&format!(
            "sentra_stage_latency_ms_sum{{stage=\"{stage}\"}} {}\n",
            self.sum_ms.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "sentra_stage_latency_ms_count{{stage=\"{stage}\"}} {cumulative}\n"
        ));
    }
}

#[derive(Debug)]
pub struct PipelineMetrics {
    pub events_total: AtomicU64,
    pub approved: AtomicU64,
    pub manual_review: AtomicU64,
    pub blocked: AtomicU64,
    pub duplicates: AtomicU64,
    pub invalid_events: AtomicU64,
    pub agent_runs: AtomicU64,
    pub agent_failures: AtomicU64,
    pub agent_skips: AtomicU64,
    pub learned_patterns: AtomicU64,
    pub velocity_hits: AtomicU64,
    pub card_testing_hits: AtomicU64,
    pub soft_failures: AtomicU64,
    pub memory_write_losses: AtomicU64,
    stages: [LatencyHistogram; Stage::ALL.len()],
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            approved: AtomicU64::new(0),
            manual_review: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            invalid_events: AtomicU64::new(0),
            agent_runs: AtomicU64::new(0),
            agent_failures: AtomicU64::new(0),
            agent_skips: AtomicU64::new(0),
            learned_patterns: AtomicU64::new(0),
            velocity_hits: AtomicU64::new(0),
            card_testing_hits: AtomicU64::new(0),
            soft_failures: AtomicU64::new(0),
            memory_write_losses: AtomicU64::new(0),
            stages: std::array::from_fn(|_| LatencyHistogram::new()),
        }
    }

    pub fn observe_stage(&self, stage: Stage, elapsed: Duration) {
        self.stages[stage.index()].observe(elapsed);
    }

    pub fn record_decision(&self, decision: Decision) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        let counter = match decision {
            Decision::Approve => &self.approved,
            Decision::ManualReview => &self.manual_review,
            Decision::Block => &self.blocked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition of counters and stage histograms. Gauges
    /// owned by other components (circuit states, limiter saturation) are
    /// appended by the HTTP layer.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &AtomicU64, &str); 14] = [
            ("sentra_events_total", &self.events_total, "Events decided"),
            ("sentra_decisions_approved_total", &self.approved, "APPROVE decisions"),
            ("sentra_decisions_manual_review_total", &self.manual_review, "MANUAL_REVIEW decisions"),
            ("sentra_decisions_blocked_total", &self.blocked, "BLOCK decisions"),
            ("sentra_duplicate_events_total", &self.duplicates, "Duplicate order ids collapsed"),
            ("sentra_invalid_events_total", &self.invalid_events, "Events failing schema validation"),
            ("sentra_agent_runs_total", &self.agent_runs, "Agent investigations launched"),
            ("sentra_agent_failures_total", &self.agent_failures, "Agent investigations failed"),
            ("sentra_agent_skips_total", &self.agent_skips, "Agent escalations skipped by rate limit"),
            ("sentra_learned_patterns_total", &self.learned_patterns, "Patterns learned into the knowledge base"),
            ("sentra_velocity_hits_total", &self.velocity_hits, "Velocity patterns detected"),
            ("sentra_card_testing_hits_total", &self.card_testing_hits, "Card-testing patterns detected"),
            ("sentra_soft_failures_total", &self.soft_failures, "Stages degraded to soft failure"),
            ("sentra_memory_write_losses_total", &self.memory_write_losses, "Buffered writes dropped"),
        ];
        for (name, counter, help) in counters {
            out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n"));
            out.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }

        out.push_str("# HELP sentra_stage_latency_ms Per-stage latency\n");
        out.push_str("# TYPE sentra_stage_latency_ms histogram\n");
        for stage in Stage::ALL {
            self.stages[stage.index()].render(&mut out, stage.as_str());
        }
        out
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_feed_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_decision(Decision::Approve);
        metrics.record_decision(Decision::Block);
        metrics.record_decision(Decision::Block);
        assert_eq!(metrics.events_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.blocked.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let metrics = PipelineMetrics::new();
        metrics.observe_stage(Stage::Ml, Duration::from_millis(3));
        metrics.observe_stage(Stage::Ml, Duration::from_millis(80));
        metrics.observe_stage(Stage::Ml, Duration::from_secs(20));
        let text = metrics.to_prometheus();
        assert!(text.contains("sentra_stage_latency_ms_bucket{stage=\"ml\",le=\"5\"} 1"));
        assert!(text.contains("sentra_stage_latency_ms_bucket{stage=\"ml\",le=\"100\"} 2"));
        assert!(text.contains("sentra_stage_latency_ms_bucket{stage=\"ml\",le=\"+Inf\"} 3"));
        assert!(text.contains("sentra_stage_latency_ms_count{stage=\"ml\"} 3"));
    }

    #[test]
    fn exposition_contains_counter_types() {
        let metrics = PipelineMetrics::new();
        let text = metrics.to_prometheus();
        assert!(text.contains("# TYPE sentra_events_total counter"));
        assert!(text.contains("# TYPE sentra_stage_latency_ms histogram"));
    }
}
