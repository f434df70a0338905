//! Bounded queue and worker pool.
//!
//! The consumer dispatches jobs to per-worker channels; when every channel
//! is full the dispatch await blocks, which pauses polling upstream. With
//! user sharding enabled, events hash by `user_id` to a fixed worker so a
//! single user's events stay ordered.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Source coordinates needed to store the offset after the decision is
/// durable.
#[derive(Debug, Clone)]
pub struct SourceOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug)]
pub struct Job {
    pub payload: Vec<u8>,
    pub offset: Option<SourceOffset>,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job);
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<Job>>,
    shard_by_user: bool,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing `capacity` queue slots.
    pub fn start(
        workers: usize,
        capacity: usize,
        shard_by_user: bool,
        handler: Arc<dyn JobHandler>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers = workers.max(1);
        let per_worker = (capacity / workers).max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, mut rx) = mpsc::channel::<Job>(per_worker);
            senders.push(tx);
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                tracing::debug!(worker = index, "worker started");
                while let Some(job) = rx.recv().await {
                    handler.handle(job).await;
                }
                tracing::debug!(worker = index, "worker stopped");
            }));
        }

        (Self { senders, shard_by_user, next: AtomicUsize::new(0) }, handles)
    }

    /// Hand a job to a worker, waiting when its queue is full. Returns an
    /// error only when the pool has shut down.
    pub async fn dispatch(&self, job: Job, user_hint: Option<&str>) -> Result<(), Job> {
        let index = match (self.shard_by_user, user_hint) {
            (true, Some(user_id)) => {
                let mut hasher = DefaultHasher::new();
                user_id.hash(&mut hasher);
                (hasher.finish() as usize) % self.senders.len()
            }
            _ => self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len(),
        };
        self.senders[index].send(job).await.map_err(|e| e.0)
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }
}
