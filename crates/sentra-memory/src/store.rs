//! The memory store contract and its in-process backend.
//!
//! Keys follow the `user:{id}` / `ip:{addr}` convention of the backing
//! key-value store. The orchestrator is the only writer of flags;
//! detection stages only read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use sentra_core::decision::DecisionRecord;
use sentra_core::reputation::{FlagReason, IpReputation, UserReputation};
use sentra_core::velocity::WindowEntry;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
}

/// How long an unflagged user record (reviews, fraud counts) stays visible.
const USER_RECORD_TTL: Duration = Duration::from_secs(7 * 86_400);

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get_user_reputation(&self, user_id: &str)
        -> Result<Option<UserReputation>, StoreError>;

    async fn get_ip_reputation(&self, ip: &str) -> Result<Option<IpReputation>, StoreError>;

    /// Idempotent flag write: refreshes the TTL, bumps the monotonic fraud
    /// count and records the latest reason.
    async fn flag_user(
        &self,
        user_id: &str,
        reason: FlagReason,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn flag_ip(&self, ip: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remember that the user's latest decision was a manual review.
    async fn record_review(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Append to the velocity window. Entries sharing an order id with one
    /// already present are no-op inserts; future-dated entries are dropped.
    async fn record_transaction(
        &self,
        user_id: &str,
        entry: WindowEntry,
    ) -> Result<(), StoreError>;

    /// Window entries inside `window` of now, oldest first.
    async fn get_velocity_window(
        &self,
        user_id: &str,
        window: Duration,
    ) -> Result<Vec<WindowEntry>, StoreError>;

    /// Decision dedup set keyed by order id.
    async fn put_decision(
        &self,
        order_id: &str,
        record: &DecisionRecord,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn get_decision(&self, order_id: &str) -> Result<Option<DecisionRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct UserEntry {
    rep: UserReputation,
    flag_expires: Option<Instant>,
    expires: Instant,
}

#[derive(Debug, Clone)]
struct IpEntry {
    rep: IpReputation,
    expires: Instant,
}

/// Process-local backend. TTLs are enforced on read, and velocity windows
/// are trimmed on every append.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, UserEntry>>,
    ips: RwLock<HashMap<String, IpEntry>>,
    windows: RwLock<HashMap<String, Vec<WindowEntry>>>,
    decisions: RwLock<HashMap<String, (DecisionRecord, Instant)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get_user_reputation(
        &self,
        user_id: &str,
    ) -> Result<Option<UserReputation>, StoreError> {
        let mut users = self.users.write().await;
        let now = Instant::now();
        let Some(entry) = users.get_mut(user_id) else {
            return Ok(None);
        };
        if entry.expires <= now {
            users.remove(user_id);
            return Ok(None);
        }
        if entry.flag_expires.map(|at| at <= now).unwrap_or(false) {
            entry.rep.flagged = false;
            entry.flag_expires = None;
        }
        Ok(Some(entry.rep.clone()))
    }

    async fn get_ip_reputation(&self, ip: &str) -> Result<Option<IpReputation>, StoreError> {
        let mut ips = self.ips.write().await;
        match ips.get(ip) {
            Some(entry) if entry.expires > Instant::now() => Ok(Some(entry.rep.clone())),
            Some(_) => {
                ips.remove(ip);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn flag_user(
        &self,
        user_id: &str,
        reason: FlagReason,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let now = Instant::now();
        let entry = users.entry(user_id.to_string()).or_insert_with(|| UserEntry {
            rep: UserReputation::clean(),
            flag_expires: None,
            expires: now + USER_RECORD_TTL,
        });
        entry.rep.flagged = true;
        entry.rep.flag_reason = Some(reason);
        entry.rep.flagged_at = Some(Utc::now());
        entry.rep.fraud_count += 1;
        entry.flag_expires = Some(now + ttl);
        entry.expires = entry.expires.max(now + ttl.max(USER_RECORD_TTL));
        Ok(())
    }

    async fn flag_ip(&self, ip: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut ips = self.ips.write().await;
        let now = Instant::now();
        let wall = Utc::now();
        let entry = ips.entry(ip.to_string()).or_insert_with(|| IpEntry {
            rep: IpReputation {
                flagged: false,
                fraud_case_count: 0,
                first_seen: wall,
                last_seen: wall,
            },
            expires: now + ttl,
        });
        entry.rep.flagged = true;
        entry.rep.fraud_case_count += 1;
        entry.rep.last_seen = wall;
        entry.expires = now + ttl;
        Ok(())
    }

    async fn record_review(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let now = Instant::now();
        let entry = users.entry(user_id.to_string()).or_insert_with(|| UserEntry {
            rep: UserReputation::clean(),
            flag_expires: None,
            expires: now + USER_RECORD_TTL,
        });
        entry.rep.last_review_at = Some(at);
        entry.expires = entry.expires.max(now + USER_RECORD_TTL);
        Ok(())
    }

    async fn record_transaction(
        &self,
        user_id: &str,
        entry: WindowEntry,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        if entry.timestamp > now {
            tracing::warn!(
                user = user_id,
                order = %entry.order_id,
                "dropping future-dated window entry"
            );
            return Ok(());
        }
        let mut windows = self.windows.write().await;
        let window = windows.entry(user_id.to_string()).or_default();
        if window.iter().any(|e| e.order_id == entry.order_id) {
            return Ok(());
        }
        window.push(entry);
        window.sort_by_key(|e| e.timestamp);
        let cutoff = now - chrono::Duration::hours(1);
        window.retain(|e| e.timestamp > cutoff);
        Ok(())
    }

    async fn get_velocity_window(
        &self,
        user_id: &str,
        window: Duration,
    ) -> Result<Vec<WindowEntry>, StoreError> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let windows = self.windows.read().await;
        Ok(windows
            .get(user_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.timestamp > cutoff && e.timestamp <= now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_decision(
        &self,
        order_id: &str,
        record: &DecisionRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut decisions = self.decisions.write().await;
        // First write wins so a replayed event returns the original record.
        decisions
            .entry(order_id.to_string())
            .or_insert_with(|| (record.clone(), Instant::now() + ttl));
        if decisions.len() > 4096 {
            let now = Instant::now();
            decisions.retain(|_, (_, expires)| *expires > now);
        }
        Ok(())
    }

    async fn get_decision(&self, order_id: &str) -> Result<Option<DecisionRecord>, StoreError> {
        let decisions = self.decisions.read().await;
        Ok(decisions
            .get(order_id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(record, _)| record.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(order_id: &str, amount: f64, seconds_ago: i64) -> WindowEntry {
        WindowEntry {
            order_id: order_id.to_string(),
            amount,
            timestamp: Utc::now() - chrono::Duration::seconds(seconds_ago),
        }
    }

    #[tokio::test]
    async fn flag_user_increments_and_expires() {
        let store = InMemoryStore::new();
        store
            .flag_user("u1", FlagReason::ConfirmedFraud, Duration::from_millis(40))
            .await
            .unwrap();
        store
            .flag_user("u1", FlagReason::ConfirmedFraud, Duration::from_millis(40))
            .await
            .unwrap();

        let rep = store.get_user_reputation("u1").await.unwrap().unwrap();
        assert!(rep.flagged);
        assert_eq!(rep.fraud_count, 2);
        assert!(rep.fraud_flagged());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let rep = store.get_user_reputation("u1").await.unwrap().unwrap();
        assert!(!rep.flagged, "flag must lapse after its TTL");
        assert_eq!(rep.fraud_count, 2, "fraud count survives flag expiry");
    }

    #[tokio::test]
    async fn unknown_user_reads_none() {
        let store = InMemoryStore::new();
        assert!(store.get_user_reputation("ghost").await.unwrap().is_none());
        assert!(store.get_ip_reputation("203.0.113.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ip_flag_counts_cases() {
        let store = InMemoryStore::new();
        store.flag_ip("203.0.113.9", Duration::from_secs(60)).await.unwrap();
        store.flag_ip("203.0.113.9", Duration::from_secs(60)).await.unwrap();
        let rep = store.get_ip_reputation("203.0.113.9").await.unwrap().unwrap();
        assert!(rep.flagged);
        assert_eq!(rep.fraud_case_count, 2);
    }

    #[tokio::test]
    async fn window_dedups_and_orders() {
        let store = InMemoryStore::new();
        store.record_transaction("u1", entry("o2", 20.0, 10)).await.unwrap();
        store.record_transaction("u1", entry("o1", 10.0, 30)).await.unwrap();
        store.record_transaction("u1", entry("o1", 99.0, 5)).await.unwrap();

        let window =
            store.get_velocity_window("u1", Duration::from_secs(3600)).await.unwrap();
        assert_eq!(window.len(), 2, "duplicate order id must be a no-op");
        assert_eq!(window[0].order_id, "o1");
        assert_eq!(window[0].amount, 10.0, "first write wins");
        assert_eq!(window[1].order_id, "o2");
    }

    #[tokio::test]
    async fn window_trims_old_and_future_entries() {
        let store = InMemoryStore::new();
        store.record_transaction("u1", entry("old", 10.0, 4000)).await.unwrap();
        store.record_transaction("u1", entry("future", 10.0, -120)).await.unwrap();
        store.record_transaction("u1", entry("now", 10.0, 1)).await.unwrap();

        let window =
            store.get_velocity_window("u1", Duration::from_secs(3600)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].order_id, "now");
    }

    #[tokio::test]
    async fn window_read_respects_requested_span() {
        let store = InMemoryStore::new();
        store.record_transaction("u1", entry("a", 10.0, 400)).await.unwrap();
        store.record_transaction("u1", entry("b", 10.0, 5)).await.unwrap();
        let recent = store.get_velocity_window("u1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].order_id, "b");
    }

    #[tokio::test]
    async fn decision_dedup_first_write_wins_and_expires() {
        let store = InMemoryStore::new();
        let first = DecisionRecord::malformed("o1".into(), "u1".into(), "first".into());
        let second = DecisionRecord::malformed("o1".into(), "u1".into(), "second".into());
        store.put_decision("o1", &first, Duration::from_millis(40)).await.unwrap();
        store.put_decision("o1", &second, Duration::from_secs(60)).await.unwrap();

        let got = store.get_decision("o1").await.unwrap().unwrap();
        assert_eq!(got.contributing_factors[0].evidence, "first");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get_decision("o1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn review_recorded_without_flag() {
        let store = InMemoryStore::new();
        store.record_review("u1", Utc::now()).await.unwrap();
        let rep = store.get_user_reputation("u1").await.unwrap().unwrap();
        assert!(!rep.flagged);
        assert!(rep.last_review_at.is_some());
        assert_eq!(rep.fraud_count, 0);
    }
}
