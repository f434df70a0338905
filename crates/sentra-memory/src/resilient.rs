//! Fail-soft wrapper over any [`MemoryStore`] backend.
//!
//! Reads never fail the caller: a read that errors is logged, counted and
//! served as an empty value (no reputation, empty window, no prior
//! decision), so detectors and tools see an absent record instead of an
//! outage. Writes never fail either: when the backend errors they are
//! parked in a bounded buffer and replayed after the next successful
//! operation. A full buffer drops its oldest entry and counts the loss.
//! Only `ping` surfaces backend errors, for the readiness probe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use sentra_core::decision::DecisionRecord;
use sentra_core::reputation::{FlagReason, IpReputation, UserReputation};
use sentra_core::velocity::WindowEntry;

use crate::store::{MemoryStore, StoreError};

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
enum PendingWrite {
    FlagUser { user_id: String, reason: FlagReason, ttl: Duration },
    FlagIp { ip: String, ttl: Duration },
    RecordReview { user_id: String, at: DateTime<Utc> },
    RecordTransaction { user_id: String, entry: WindowEntry },
    PutDecision { order_id: String, record: Box<DecisionRecord>, ttl: Duration },
}

pub struct BufferedStore<S> {
    inner: S,
    buffer: Mutex<VecDeque<PendingWrite>>,
    capacity: usize,
    losses: AtomicU64,
    read_failures: AtomicU64,
}

impl<S: MemoryStore> BufferedStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_capacity(inner, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            buffer: Mutex::new(VecDeque::new()),
            capacity,
            losses: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Writes dropped because the buffer was full.
    pub fn loss_count(&self) -> u64 {
        self.losses.load(Ordering::Relaxed)
    }

    /// Reads degraded to empty values because the backend errored.
    pub fn read_failure_count(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    fn note_read_failure(&self, op: &'static str, err: &StoreError) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op, error = %err, "memory read failed, serving empty value");
    }

    pub async fn buffered_count(&self) -> usize {
        self.buffer.lock().await.len()
    }

    async fn park(&self, write: PendingWrite) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            let lost = self.losses.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(lost, "memory write buffer full, oldest write dropped");
        }
        buffer.push_back(write);
    }

    async fn apply(&self, write: &PendingWrite) -> Result<(), StoreError> {
        match write {
            PendingWrite::FlagUser { user_id, reason, ttl } => {
                self.inner.flag_user(user_id, *reason, *ttl).await
            }
            PendingWrite::FlagIp { ip, ttl } => self.inner.flag_ip(ip, *ttl).await,
            PendingWrite::RecordReview { user_id, at } => {
                self.inner.record_review(user_id, *at).await
            }
            PendingWrite::RecordTransaction { user_id, entry } => {
                self.inner.record_transaction(user_id, entry.clone()).await
            }
            PendingWrite::PutDecision { order_id, record, ttl } => {
                self.inner.put_decision(order_id, record, *ttl).await
            }
        }
    }

    /// Replay parked writes in arrival order; stops at the first failure.
    /// Returns how many were flushed.
    pub async fn flush(&self) -> usize {
        let mut flushed = 0;
        loop {
            let next = {
                let buffer = self.buffer.lock().await;
                buffer.front().cloned()
            };
            let Some(write) = next else { break };
            if self.apply(&write).await.is_err() {
                break;
            }
            self.buffer.lock().await.pop_front();
            flushed += 1;
        }
        if flushed > 0 {
            tracing::info!(flushed, "replayed buffered memory writes");
        }
        flushed
    }

    async fn write_or_park(&self, write: PendingWrite) -> Result<(), StoreError> {
        // Drain any backlog first so replayed writes stay ordered ahead of
        // new ones.
        if self.buffered_count().await > 0 {
            self.flush().await;
        }
        if self.buffered_count().await > 0 {
            self.park(write).await;
            return Ok(());
        }
        match self.apply(&write).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, "memory write failed, parking for retry");
                self.park(write).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S: MemoryStore> MemoryStore for BufferedStore<S> {
    async fn get_user_reputation(
        &self,
        user_id: &str,
    ) -> Result<Option<UserReputation>, StoreError> {
        match self.inner.get_user_reputation(user_id).await {
            Ok(reputation) => Ok(reputation),
            Err(err) => {
                self.note_read_failure("get_user_reputation", &err);
                Ok(None)
            }
        }
    }

    async fn get_ip_reputation(&self, ip: &str) -> Result<Option<IpReputation>, StoreError> {
        match self.inner.get_ip_reputation(ip).await {
            Ok(reputation) => Ok(reputation),
            Err(err) => {
                self.note_read_failure("get_ip_reputation", &err);
                Ok(None)
            }
        }
    }

    async fn flag_user(
        &self,
        user_id: &str,
        reason: FlagReason,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.write_or_park(PendingWrite::FlagUser { user_id: user_id.to_string(), reason, ttl })
            .await
    }

    async fn flag_ip(&self, ip: &str, ttl: Duration) -> Result<(), StoreError> {
        self.write_or_park(PendingWrite::FlagIp { ip: ip.to_string(), ttl }).await
    }

    async fn record_review(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write_or_park(PendingWrite::RecordReview { user_id: user_id.to_string(), at })
            .await
    }

    async fn record_transaction(
        &self,
        user_id: &str,
        entry: WindowEntry,
    ) -> Result<(), StoreError> {
        self.write_or_park(PendingWrite::RecordTransaction {
            user_id: user_id.to_string(),
            entry,
        })
        .await
    }

    async fn get_velocity_window(
        &self,
        user_id: &str,
        window: Duration,
    ) -> Result<Vec<WindowEntry>, StoreError> {
        match self.inner.get_velocity_window(user_id, window).await {
            Ok(entries) => Ok(entries),
            Err(err) => {
                self.note_read_failure("get_velocity_window", &err);
                Ok(Vec::new())
            }
        }
    }

    async fn put_decision(
        &self,
        order_id: &str,
        record: &DecisionRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.write_or_park(PendingWrite::PutDecision {
            order_id: order_id.to_string(),
            record: Box::new(record.clone()),
            ttl,
        })
        .await
    }

    async fn get_decision(&self, order_id: &str) -> Result<Option<DecisionRecord>, StoreError> {
        match self.inner.get_decision(order_id).await {
            Ok(decision) => Ok(decision),
            Err(err) => {
                // Served as "no prior decision": the pipeline re-decides
                // and redelivery stays at-least-once.
                self.note_read_failure("get_decision", &err);
                Ok(None)
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::atomic::AtomicBool;

    /// Backend whose writes fail while `down` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unreachable("injected outage".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MemoryStore for FlakyStore {
        async fn get_user_reputation(
            &self,
            user_id: &str,
        ) -> Result<Option<UserReputation>, StoreError> {
            self.check()?;
            self.inner.get_user_reputation(user_id).await
        }

        async fn get_ip_reputation(
            &self,
            ip: &str,
        ) -> Result<Option<IpReputation>, StoreError> {
            self.check()?;
            self.inner.get_ip_reputation(ip).await
        }

        async fn flag_user(
            &self,
            user_id: &str,
            reason: FlagReason,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.flag_user(user_id, reason, ttl).await
        }

        async fn flag_ip(&self, ip: &str, ttl: Duration) -> Result<(), StoreError> {
            self.check()?;
            self.inner.flag_ip(ip, ttl).await
        }

        async fn record_review(
            &self,
            user_id: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.record_review(user_id, at).await
        }

        async fn record_transaction(
            &self,
            user_id: &str,
            entry: WindowEntry,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.record_transaction(user_id, entry).await
        }

        async fn get_velocity_window(
            &self,
            user_id: &str,
            window: Duration,
        ) -> Result<Vec<WindowEntry>, StoreError> {
            self.check()?;
            self.inner.get_velocity_window(user_id, window).await
        }

        async fn put_decision(
            &self,
            order_id: &str,
            record: &DecisionRecord,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put_decision(order_id, record, ttl).await
        }

        async fn get_decision(
            &self,
            order_id: &str,
        ) -> Result<Option<DecisionRecord>, StoreError> {
            self.check()?;
            self.inner.get_decision(order_id).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.check()
        }
    }

    #[tokio::test]
    async fn writes_never_fail_and_replay_after_recovery() {
        let flaky = FlakyStore::default();
        flaky.set_down(true);
        let store = BufferedStore::new(flaky);

        store
            .flag_user("u1", FlagReason::ConfirmedFraud, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.buffered_count().await, 1);

        store.inner().set_down(false);
        store.flush().await;
        assert_eq!(store.buffered_count().await, 0);

        let rep = store.get_user_reputation("u1").await.unwrap().unwrap();
        assert!(rep.flagged);
    }

    #[tokio::test]
    async fn reads_fail_soft_on_outage() {
        let flaky = FlakyStore::default();
        flaky.set_down(true);
        let store = BufferedStore::new(flaky);

        assert!(store.get_user_reputation("u1").await.unwrap().is_none());
        assert!(store.get_ip_reputation("203.0.113.9").await.unwrap().is_none());
        assert!(store
            .get_velocity_window("u1", Duration::from_secs(3600))
            .await
            .unwrap()
            .is_empty());
        assert!(store.get_decision("o1").await.unwrap().is_none());
        assert_eq!(store.read_failure_count(), 4);

        // The readiness probe still sees the outage.
        assert!(store.ping().await.is_err());

        store.inner().set_down(false);
        store
            .flag_user("u1", FlagReason::ConfirmedFraud, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.get_user_reputation("u1").await.unwrap().is_some());
        assert_eq!(store.read_failure_count(), 4, "healthy reads are not counted");
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_and_counts() {
        let flaky = FlakyStore::default();
        flaky.set_down(true);
        let store = BufferedStore::with_capacity(flaky, 2);

        for i in 0..3 {
            store
                .record_review(&format!("u{i}"), Utc::now())
                .await
                .unwrap();
        }
        assert_eq!(store.buffered_count().await, 2);
        assert_eq!(store.loss_count(), 1);

        store.inner().set_down(false);
        store.flush().await;
        // u0 was dropped; u1 and u2 survived.
        assert!(store.get_user_reputation("u0").await.unwrap().is_none());
        assert!(store.get_user_reputation("u1").await.unwrap().is_some());
        assert!(store.get_user_reputation("u2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn later_write_drains_backlog_first() {
        let flaky = FlakyStore::default();
        flaky.set_down(true);
        let store = BufferedStore::new(flaky);

        store
            .flag_user("u1", FlagReason::ManualReview, Duration::from_secs(60))
            .await
            .unwrap();
        store.inner().set_down(false);
        store.record_review("u2", Utc::now()).await.unwrap();

        assert_eq!(store.buffered_count().await, 0);
        assert!(store.get_user_reputation("u1").await.unwrap().is_some());
        assert!(store.get_user_reputation("u2").await.unwrap().is_some());
    }
}
