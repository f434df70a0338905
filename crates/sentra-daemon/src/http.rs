//! Health and metrics surface.
//!
//! `GET /health`        200 iff no circuit breaker is fully open
//! `GET /health/live`   200 while the process runs
//! `GET /health/ready`  200 iff the consumer is attached and memory and
//!                      knowledge base respond
//! `GET /metrics`       Prometheus text exposition

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use sentra_core::circuit::{BreakerRegistry, CircuitState};
use sentra_core::metrics::PipelineMetrics;
use sentra_llm::rate_limit::LlmRateLimiter;
use sentra_memory::knowledge::FraudKnowledgeBase;
use sentra_memory::store::MemoryStore;

pub struct HealthState {
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<PipelineMetrics>,
    pub store: Arc<dyn MemoryStore>,
    pub knowledge: Arc<FraudKnowledgeBase>,
    pub limiter: Option<Arc<LlmRateLimiter>>,
    pub consumer_attached: Arc<AtomicBool>,
    pub write_losses: Arc<dyn Fn() -> u64 + Send + Sync>,
    pub read_failures: Arc<dyn Fn() -> u64 + Send + Sync>,
    pub started_at: Instant,
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health server listening");
    axum::serve(listener, router(state)).await
}

async fn health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let mut circuits = serde_json::Map::new();
    let mut healthy = true;
    for breaker in state.breakers.all() {
        let breaker_state = breaker.state().await;
        if breaker_state == CircuitState::Open {
            healthy = false;
        }
        circuits.insert(breaker.name().to_string(), json!(breaker_state.as_str()));
    }

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "circuits": circuits,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (status, Json(body))
}

async fn live() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let consumer = state.consumer_attached.load(Ordering::Relaxed);
    let memory = state.store.ping().await.is_ok();
    // The in-process index answers iff the process is alive; a remote
    // backend would surface connectivity here.
    let knowledge = state.knowledge.len() > 0;

    let ready = consumer && memory && knowledge;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "consumer_attached": consumer,
            "memory_reachable": memory,
            "knowledge_reachable": knowledge,
        })),
    )
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let mut body = state.metrics.to_prometheus();

    body.push_str("# HELP sentra_circuit_state Circuit state (0 closed, 1 half-open, 2 open)\n");
    body.push_str("# TYPE sentra_circuit_state gauge\n");
    for breaker in state.breakers.all() {
        let value = match breaker.state().await {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        body.push_str(&format!(
            "sentra_circuit_state{{component=\"{}\"}} {value}\n",
            breaker.name()
        ));
    }

    if let Some(limiter) = &state.limiter {
        let stats = limiter.stats().await;
        body.push_str("# HELP sentra_llm_limiter_calls_in_window LLM calls in the current window\n");
        body.push_str("# TYPE sentra_llm_limiter_calls_in_window gauge\n");
        body.push_str(&format!("sentra_llm_limiter_calls_in_window {}\n", stats.calls_in_window));
        body.push_str("# HELP sentra_llm_limiter_saturated Whether escalations are being skipped\n");
        body.push_str("# TYPE sentra_llm_limiter_saturated gauge\n");
        body.push_str(&format!(
            "sentra_llm_limiter_saturated {}\n",
            if stats.saturated { 1 } else { 0 }
        ));
    }

    body.push_str("# HELP sentra_knowledge_patterns Patterns in the knowledge base\n");
    body.push_str("# TYPE sentra_knowledge_patterns gauge\n");
    body.push_str(&format!("sentra_knowledge_patterns {}\n", state.knowledge.len()));

    body.push_str("# HELP sentra_memory_buffer_losses Buffered memory writes dropped\n");
    body.push_str("# TYPE sentra_memory_buffer_losses counter\n");
    body.push_str(&format!("sentra_memory_buffer_losses {}\n", (state.write_losses)()));

    body.push_str("# HELP sentra_memory_read_failures Memory reads degraded to empty values\n");
    body.push_str("# TYPE sentra_memory_read_failures counter\n");
    body.push_str(&format!("sentra_memory_read_failures {}\n", (state.read_failures)()));

    ([("content-type", "text/plain; version=0.0.4")], body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::circuit::CircuitConfig;
    use sentra_memory::embedding::TrigramEmbedder;
    use sentra_memory::store::InMemoryStore;
    use tower::ServiceExt;

    fn state_with_breakers(breakers: Arc<BreakerRegistry>) -> Arc<HealthState> {
        let knowledge = Arc::new(FraudKnowledgeBase::new(Arc::new(TrigramEmbedder::new())));
        knowledge.seed_if_empty();
        Arc::new(HealthState {
            breakers,
            metrics: Arc::new(PipelineMetrics::new()),
            store: Arc::new(InMemoryStore::new()),
            knowledge,
            limiter: None,
            consumer_attached: Arc::new(AtomicBool::new(true)),
            write_losses: Arc::new(|| 0),
            read_failures: Arc::new(|| 0),
            started_at: Instant::now(),
        })
    }

    fn state() -> Arc<HealthState> {
        state_with_breakers(Arc::new(BreakerRegistry::default()))
    }

    async fn get_status(router: Router, uri: &str) -> StatusCode {
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn live_is_always_ok() {
        assert_eq!(get_status(router(state()), "/health/live").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_requires_consumer() {
        let state = state();
        assert_eq!(get_status(router(state.clone()), "/health/ready").await, StatusCode::OK);
        state.consumer_attached.store(false, Ordering::Relaxed);
        assert_eq!(
            get_status(router(state), "/health/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn health_degrades_when_a_circuit_opens() {
        let state = state_with_breakers(Arc::new(BreakerRegistry::new(CircuitConfig {
            failure_threshold: 1,
            cooldown: std::time::Duration::from_secs(60),
        })));
        assert_eq!(get_status(router(state.clone()), "/health").await, StatusCode::OK);
        state.breakers.db.record_failure().await;
        assert_eq!(
            get_status(router(state), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn metrics_exposition_includes_gauges() {
        let response = router(state())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/metrics")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("sentra_circuit_state{component=\"memory\"}"));
        assert!(text.contains("sentra_knowledge_patterns 10"));
        assert!(text.contains("sentra_events_total"));
    }
}
