//! Fraud-pattern knowledge base.
//!
//! A vector index of fraud descriptions supporting top-k cosine search and
//! idempotent inserts. Patterns are immutable once written: seeding adds
//! ten canonical patterns to an empty collection, and the orchestrator adds
//! learned patterns after confirmed high-score blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use sentra_core::decision::Severity;

use crate::embedding::{cosine_similarity, Embedder};

/// Hits below this similarity are not surfaced.
pub const SIMILARITY_FLOOR: f32 = 0.7;
/// Re-inserting the same (description, fraud type) inside this window is a
/// no-op.
const DUPLICATE_SUPPRESSION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    Seeded,
    Learned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMetadata {
    pub fraud_type: String,
    pub severity: Severity,
    pub example_amount_range: String,
    pub source: PatternSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudPattern {
    pub id: String,
    pub description: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub metadata: PatternMetadata,
}

pub struct FraudKnowledgeBase {
    embedder: Arc<dyn Embedder>,
    index: RwLock<Vec<FraudPattern>>,
    recent_inserts: Mutex<HashMap<String, Instant>>,
}

impl FraudKnowledgeBase {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: RwLock::new(Vec::new()),
            recent_inserts: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a pattern. Returns `false` when suppressed as a duplicate:
    /// same description already indexed, or same (description, fraud type)
    /// seen within the suppression window.
    pub fn insert(&self, description: &str, metadata: PatternMetadata) -> bool {
        let id = hex::encode(Sha256::digest(description.as_bytes()));
        let dedup_key = format!("{id}:{}", metadata.fraud_type);

        {
            let mut recent = self.recent_inserts.lock().unwrap();
            let now = Instant::now();
            recent.retain(|_, at| now.duration_since(*at) < DUPLICATE_SUPPRESSION);
            if recent.contains_key(&dedup_key) {
                return false;
            }
            recent.insert(dedup_key, now);
        }

        let vector = self.embedder.embed(description);
        let mut index = self.index.write().unwrap();
        if index.iter().any(|p| p.id == id) {
            return false;
        }
        tracing::debug!(fraud_type = %metadata.fraud_type, source = ?metadata.source, "pattern indexed");
        index.push(FraudPattern { id, description: description.to_string(), vector, metadata });
        true
    }

    /// Top-k nearest patterns by cosine similarity, floor-filtered and best
    /// first. Returns fewer than k when the index is small or sparse.
    pub fn search(&self, query_text: &str, k: usize) -> Vec<(FraudPattern, f32)> {
        let query = self.embedder.embed(query_text);
        let index = self.index.read().unwrap();
        let mut hits: Vec<(FraudPattern, f32)> = index
            .iter()
            .map(|p| (p.clone(), cosine_similarity(&query, &p.vector)))
            .filter(|(_, sim)| *sim >= SIMILARITY_FLOOR)
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// Populate an empty collection with the canonical fraud patterns.
    /// Returns how many were inserted; a non-empty collection is left
    /// untouched.
    pub fn seed_if_empty(&self) -> usize {
        if !self.is_empty() {
            return 0;
        }
        let mut inserted = 0;
        for (description, fraud_type, severity, range) in SEED_PATTERNS {
            let metadata = PatternMetadata {
                fraud_type: (*fraud_type).to_string(),
                severity: *severity,
                example_amount_range: (*range).to_string(),
                source: PatternSource::Seeded,
                created_at: Utc::now(),
            };
            if self.insert(description, metadata) {
                inserted += 1;
            }
        }
        tracing::info!(patterns = inserted, "knowledge base seeded");
        inserted
    }
}

/// The canonical patterns every deployment starts from.
const SEED_PATTERNS: &[(&str, &str, Severity, &str)] = &[
    (
        "Series of small card purchases under five dollars probing whether a stolen card is live",
        "card_testing",
        Severity::High,
        "1-5",
    ),
    (
        "Several orders placed within seconds of each other from a single account",
        "rapid_fire",
        Severity::Critical,
        "10-100",
    ),
    (
        "Sequential card numbers from one bank identification range attempted against cheap items",
        "bin_probing",
        Severity::High,
        "1-10",
    ),
    (
        "Shipping country differs from billing country on an early order",
        "geo_mismatch",
        Severity::Medium,
        "50-500",
    ),
    (
        "Account created hours ago immediately placing an order above five hundred dollars",
        "new_account_large_amount",
        Severity::High,
        "500-5000",
    ),
    (
        "Burst of instantly redeemable digital goods purchases with no shipping address",
        "digital_goods_burst",
        Severity::Medium,
        "5-50",
    ),
    (
        "Marketplace listings fulfilled with stolen cards and shipped to unrelated buyers",
        "triangulation",
        Severity::High,
        "100-1000",
    ),
    (
        "Small repeated edits to the shipping address across consecutive orders",
        "address_shuffle",
        Severity::Medium,
        "50-300",
    ),
    (
        "Many refunds requested just below the manual review fee threshold",
        "fee_skimming",
        Severity::Medium,
        "10-40",
    ),
    (
        "Established account abruptly changing device, location and payment method together",
        "takeover_drift",
        Severity::Critical,
        "100-2000",
    ),
];
