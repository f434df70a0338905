//! Circuit breakers for external collaborators.
//!
//! Closed -> Open after a run of consecutive failures; Open -> HalfOpen
//! once the cooldown passes; HalfOpen -> Closed on the first success and
//! back to Open on any failure. Calls attempted while Open short-circuit
//! with [`PipelineError::CircuitOpen`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(30) }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitConfig,
    inner: RwLock<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    opens: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitConfig) -> Self {
        Self {
            name,
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            opens: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gate a call. Moves Open -> HalfOpen when the cooldown has elapsed.
    pub async fn admit(&self) -> Result<(), PipelineError> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(breaker = self.name, "circuit half-open, probing recovery");
                    Ok(())
                } else {
                    Err(PipelineError::CircuitOpen(self.name))
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
    }

    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                self.opens.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(breaker = self.name, "recovery probe failed, circuit re-opened");
            }
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                inner.state = CircuitState::Open;
                self.opens.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    breaker = self.name,
                    failures = inner.consecutive_failures,
                    "failure threshold reached, circuit opened"
                );
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// (total calls, total failures, times opened)
    pub fn stats(&self) -> (u64, u64, u32) {
        (
            self.total_calls.load(Ordering::Relaxed),
            self.total_failures.load(Ordering::Relaxed),
            self.opens.load(Ordering::Relaxed),
        )
    }
}

/// One breaker per external collaborator, built once at startup.
#[derive(Debug)]
pub struct BreakerRegistry {
    pub memory: CircuitBreaker,
    pub knowledge: CircuitBreaker,
    pub ml: CircuitBreaker,
    pub bus: CircuitBreaker,
    pub db: CircuitBreaker,
    pub llm: CircuitBreaker,
}

impl BreakerRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            memory: CircuitBreaker::new("memory", config.clone()),
            knowledge: CircuitBreaker::new("knowledge", config.clone()),
            ml: CircuitBreaker::new("ml", config.clone()),
            bus: CircuitBreaker::new("bus", config.clone()),
            db: CircuitBreaker::new("db", config.clone()),
            llm: CircuitBreaker::new("llm", config),
        }
    }

    pub fn all(&self) -> [&CircuitBreaker; 6] {
        [&self.memory, &self.knowledge, &self.ml, &self.bus, &self.db, &self.llm]
    }

    /// Healthy means no breaker is fully open.
    pub async fn healthy(&self) -> bool {
        for breaker in self.all() {
            if breaker.state().await == CircuitState::Open {
                return false;
            }
        }
        true
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
