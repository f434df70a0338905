//! Daemon entry point.
//!
//! Exit codes: 0 clean shutdown, 1 fatal startup, 2 non-recoverable
//! runtime loss.

use async_trait::async_trait;
use rdkafka::consumer::StreamConsumer;
use rdkafka::producer::FutureProducer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sentra_agents::AgentRuntime;
use sentra_core::circuit::BreakerRegistry;
use sentra_core::config::Settings;
use sentra_core::features::FEATURE_DIM;
use sentra_core::metrics::{PipelineMetrics, Stage};
use sentra_core::ml::{IsolationScorer, ScoringModel};
use sentra_core::retry::RetryPolicy;
use sentra_llm::mock::MockProvider;
use sentra_llm::openai::OpenAiProvider;
use sentra_llm::provider::LlmProvider;
use sentra_llm::rate_limit::{LlmRateLimiter, RateLimitConfig};
use sentra_memory::embedding::TrigramEmbedder;
use sentra_memory::knowledge::FraudKnowledgeBase;
use sentra_memory::resilient::BufferedStore;
use sentra_memory::store::{InMemoryStore, MemoryStore};

use sentra_daemon::bus::{self, create_consumer, create_producer};
use sentra_daemon::http::{self, HealthState};
use sentra_daemon::orchestrator::Orchestrator;
use sentra_daemon::sink::DecisionSink;
use sentra_daemon::worker::{Job, JobHandler, WorkerPool};

struct PipelineHandler {
    orchestrator: Orchestrator,
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    sink: Option<DecisionSink>,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<PipelineMetrics>,
    retry: RetryPolicy,
    output_topic: String,
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn handle(&self, job: Job) {
        let outcome = self.orchestrator.process_raw(&job.payload).await;

        if !outcome.duplicate {
            let persist_started = Instant::now();

            if let Some(sink) = &self.sink {
                let durable = if self.breakers.db.admit().await.is_ok() {
                    let raw: serde_json::Value =
                        serde_json::from_slice(&job.payload).unwrap_or(serde_json::Value::Null);
                    match self.retry.run("sink_write", || sink.write(&outcome.record, &raw)).await
                    {
                        Ok(()) => {
                            self.breakers.db.record_success().await;
                            true
                        }
                        Err(err) => {
                            self.breakers.db.record_failure().await;
                            tracing::error!(
                                order = %outcome.record.order_id,
                                error = %err,
                                "durable write failed, leaving offset unstored"
                            );
                            false
                        }
                    }
                } else {
                    false
                };
                if !durable {
                    // Redelivery will retry; the dedup set keeps the
                    // decision stable.
                    return;
                }
            }

            if self.breakers.bus.admit().await.is_ok() {
                match bus::publish_decision(
                    &self.producer,
                    &self.output_topic,
                    &outcome.record,
                    &self.retry,
                )
                .await
                {
                    Ok(()) => self.breakers.bus.record_success().await,
                    Err(err) => {
                        self.breakers.bus.record_failure().await;
                        tracing::error!(
                            order = %outcome.record.order_id,
                            error = %err,
                            "decision publish failed"
                        );
                    }
                }
            }

            self.metrics.observe_stage(Stage::Persist, persist_started.elapsed());
        }

        if let Some(offset) = &job.offset {
            bus::store_offset(&self.consumer, offset);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rdkafka=warn".to_string()),
        )
        .init();

    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let settings = Arc::new(Settings::from_env());
    let metrics = Arc::new(PipelineMetrics::new());
    let breakers = Arc::new(BreakerRegistry::default());

    // The scoring model must agree with the feature extractor before any
    // event flows; a mismatch is a packaging error, not a runtime one.
    let model: Arc<dyn ScoringModel> = Arc::new(IsolationScorer::new());
    if model.expected_features() != FEATURE_DIM {
        tracing::error!(
            model = model.expected_features(),
            extractor = FEATURE_DIM,
            "scoring model feature dimension mismatch"
        );
        return 1;
    }

    let buffered = Arc::new(BufferedStore::new(InMemoryStore::new()));
    let store: Arc<dyn MemoryStore> = buffered.clone();

    let knowledge = Arc::new(FraudKnowledgeBase::new(Arc::new(TrigramEmbedder::new())));
    knowledge.seed_if_empty();

    let limiter = Arc::new(LlmRateLimiter::new(RateLimitConfig {
        max_per_minute: settings.agents.max_requests_per_minute,
        min_gap: settings.agents.request_delay,
        max_wait: settings.agents.max_rate_limit_wait,
    }));
    let agents = if settings.agents.enabled {
        let provider: Arc<dyn LlmProvider> = match &settings.agents.openai_api_key {
            Some(key) => Arc::new(OpenAiProvider::new(key, &settings.agents.openai_model)),
            None => {
                tracing::warn!("OPENAI_API_KEY not set, agent runtime uses the mock provider");
                Arc::new(MockProvider::new(Vec::new()))
            }
        };
        Some(Arc::new(AgentRuntime::new(provider, limiter.clone(), settings.agents.clone())))
    } else {
        tracing::info!("agent escalation disabled by configuration");
        None
    };

    let sink = match &settings.database_url {
        Some(url) => match DecisionSink::connect(url).await {
            Ok(sink) => Some(sink),
            Err(err) => {
                tracing::error!(error = %err, "database configured but unreachable");
                return 1;
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, decisions are not durably stored");
            None
        }
    };

    let consumer = match create_consumer(&settings.kafka) {
        Ok(consumer) => Arc::new(consumer),
        Err(err) => {
            tracing::error!(error = %err, "consumer startup failed");
            return 1;
        }
    };
    let producer = match create_producer(&settings.kafka) {
        Ok(producer) => producer,
        Err(err) => {
            tracing::error!(error = %err, "producer startup failed");
            return 1;
        }
    };

    let orchestrator = Orchestrator::new(
        store.clone(),
        knowledge.clone(),
        model,
        agents,
        breakers.clone(),
        metrics.clone(),
        settings.clone(),
    );

    let handler = Arc::new(PipelineHandler {
        orchestrator,
        consumer: consumer.clone(),
        producer,
        sink,
        breakers: breakers.clone(),
        metrics: metrics.clone(),
        retry: RetryPolicy::default(),
        output_topic: settings.kafka.topic_output.clone(),
    });

    let (pool, _worker_handles) = WorkerPool::start(
        settings.worker_count,
        settings.queue_capacity,
        settings.shard_by_user,
        handler,
    );
    let pool = Arc::new(pool);
    tracing::info!(workers = pool.worker_count(), "worker pool running");

    let consumer_attached = Arc::new(AtomicBool::new(true));
    let write_loss_probe = buffered.clone();
    let read_failure_probe = buffered.clone();
    let health_state = Arc::new(HealthState {
        breakers,
        metrics,
        store,
        knowledge,
        limiter: Some(limiter),
        consumer_attached: consumer_attached.clone(),
        write_losses: Arc::new(move || write_loss_probe.loss_count()),
        read_failures: Arc::new(move || read_failure_probe.read_failure_count()),
        started_at: Instant::now(),
    });
    let health_port = settings.health_port;
    tokio::spawn(async move {
        if let Err(err) = http::serve(health_state, health_port).await {
            tracing::error!(error = %err, "health server failed");
        }
    });

    let consume = tokio::spawn(bus::consume_into(consumer, pool));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            0
        }
        result = consume => {
            consumer_attached.store(false, Ordering::Relaxed);
            match result {
                Ok(Err(err)) => tracing::error!(error = %err, "consumer loop lost"),
                Err(err) => tracing::error!(error = %err, "consumer task panicked"),
                Ok(Ok(())) => {}
            }
            2
        }
    }
}
