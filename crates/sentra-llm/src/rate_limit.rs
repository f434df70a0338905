//! Rate limiting for LLM calls.
//!
//! Two constraints: a per-minute request window and a minimum gap between
//! consecutive calls. Callers wait cooperatively for a slot, but never
//! beyond `max_wait`; past that the call fails and the orchestrator falls
//! back to its pre-agent triage result.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
// tokio's Instant so paused-clock tests can drive the window.
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_per_minute: u32,
    pub min_gap: Duration,
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 20,
            min_gap: Duration::from_secs(3),
            max_wait: Duration::from_secs(30),
        }
    }
}

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limiter saturated, next slot in {retry_after:?}")]
    Saturated { retry_after: Duration },
}

#[derive(Debug)]
struct LimiterState {
    window_start: Instant,
    count: u32,
    last_call: Option<Instant>,
}

#[derive(Debug)]
pub struct LlmRateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

#[derive(Debug, Clone)]
pub struct LimiterStats {
    pub calls_in_window: u32,
    pub max_per_minute: u32,
    pub saturated: bool,
    pub window_remaining: Duration,
}

impl LlmRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                window_start: Instant::now(),
                count: 0,
                last_call: None,
            }),
        }
    }

    fn required_wait(&self, state: &mut LimiterState, now: Instant) -> Duration {
        if now.duration_since(state.window_start) >= WINDOW {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= self.config.max_per_minute {
            return WINDOW - now.duration_since(state.window_start);
        }
        if let Some(last) = state.last_call {
            let since = now.duration_since(last);
            if since < self.config.min_gap {
                return self.config.min_gap - since;
            }
        }
        Duration::ZERO
    }

    /// Take a slot, waiting cooperatively up to `max_wait` in total.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let wait = self.required_wait(&mut state, now);
                if wait.is_zero() {
                    state.count += 1;
                    state.last_call = Some(now);
                    return Ok(());
                }
                wait
            };
            if waited + wait > self.config.max_wait {
                return Err(RateLimitError::Saturated { retry_after: wait });
            }
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    /// Would a call right now have to wait beyond the wait budget? Used to
    /// skip agent escalation up front instead of stalling a worker.
    pub async fn is_saturated(&self) -> bool {
        let mut state = self.state.lock().await;
        let wait = self.required_wait(&mut state, Instant::now());
        wait > self.config.max_wait
    }

    pub async fn stats(&self) -> LimiterStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let wait = self.required_wait(&mut state, now);
        LimiterStats {
            calls_in_window: state.count,
            max_per_minute: self.config.max_per_minute,
            saturated: wait > self.config.max_wait,
            window_remaining: WINDOW.saturating_sub(now.duration_since(state.window_start)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_window_limit() {
        let limiter = LlmRateLimiter::new(RateLimitConfig {
            max_per_minute: 3,
            min_gap: Duration::ZERO,
            max_wait: Duration::from_millis(1),
        });
        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }
        assert!(matches!(
            limiter.acquire().await,
            Err(RateLimitError::Saturated { .. })
        ));
    }

    #[tokio::test]
    async fn enforces_min_gap() {
        let limiter = LlmRateLimiter::new(RateLimitConfig {
            max_per_minute: 100,
            min_gap: Duration::from_millis(30),
            max_wait: Duration::from_secs(1),
        });
        let start = Instant::now();
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn saturation_probe_is_non_consuming() {
        let limiter = LlmRateLimiter::new(RateLimitConfig {
            max_per_minute: 1,
            min_gap: Duration::ZERO,
            max_wait: Duration::from_millis(5),
        });
        assert!(!limiter.is_saturated().await);
        limiter.acquire().await.unwrap();
        assert!(limiter.is_saturated().await);
        // The probe itself must not consume a slot once the window resets.
        let stats = limiter.stats().await;
        assert_eq!(stats.calls_in_window, 1);
        assert!(stats.saturated);
    }

    #[tokio::test]
    async fn window_resets_after_a_minute() {
        tokio::time::pause();
        let limiter = LlmRateLimiter::new(RateLimitConfig {
            max_per_minute: 1,
            min_gap: Duration::ZERO,
            max_wait: Duration::from_millis(5),
        });
        limiter.acquire().await.unwrap();
        assert!(limiter.is_saturated().await);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!limiter.is_saturated().await);
        limiter.acquire().await.unwrap();
    }
}
