//! Kafka adapters: the event consumer and the decision publisher.
//!
//! Offsets are stored manually, only after the decision record is durably
//! written, so a crash between decide and persist replays the event and
//! the dedup set collapses it.

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Message, TopicPartitionList};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use sentra_core::config::KafkaSettings;
use sentra_core::decision::DecisionRecord;
use sentra_core::retry::RetryPolicy;
use sentra_core::PipelineError;

use crate::worker::{Job, SourceOffset, WorkerPool};

pub fn create_consumer(settings: &KafkaSettings) -> Result<StreamConsumer, PipelineError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", &settings.group_id)
        .set("bootstrap.servers", &settings.brokers)
        .set("auto.offset.reset", &settings.auto_offset_reset)
        // Offsets are committed explicitly after the durable write.
        .set("enable.auto.commit", "false")
        .create()
        .map_err(|e| PipelineError::fatal(format!("kafka consumer init: {e}")))?;
    consumer
        .subscribe(&[settings.topic_input.as_str()])
        .map_err(|e| PipelineError::fatal(format!("kafka subscribe: {e}")))?;
    Ok(consumer)
}

pub fn create_producer(settings: &KafkaSettings) -> Result<FutureProducer, PipelineError> {
    ClientConfig::new()
        .set("bootstrap.servers", &settings.brokers)
        .set("message.timeout.ms", "5000")
        .create()
        .map_err(|e| PipelineError::fatal(format!("kafka producer init: {e}")))
}

/// Pull events and hand them to the pool until the stream ends. Returns
/// `Err` on a non-recoverable consumer loss.
pub async fn consume_into(
    consumer: Arc<StreamConsumer>,
    pool: Arc<WorkerPool>,
) -> Result<(), PipelineError> {
    let mut stream = consumer.stream();
    tracing::info!("consumer attached, pulling events");
    while let Some(message) = stream.next().await {
        match message {
            Ok(msg) => {
                let Some(payload) = msg.payload() else {
                    continue;
                };
                let user_hint = serde_json::from_slice::<Value>(payload)
                    .ok()
                    .and_then(|v| v.get("user_id").and_then(Value::as_str).map(str::to_string));
                let job = Job {
                    payload: payload.to_vec(),
                    offset: Some(SourceOffset {
                        topic: msg.topic().to_string(),
                        partition: msg.partition(),
                        offset: msg.offset(),
                    }),
                };
                if pool.dispatch(job, user_hint.as_deref()).await.is_err() {
                    return Err(PipelineError::fatal("worker pool shut down".to_string()));
                }
            }
            Err(err) => tracing::error!(error = %err, "consume error"),
        }
    }
    Err(PipelineError::fatal("consumer stream ended".to_string()))
}

/// Mark the event's offset as processed; the background commit persists
/// it.
pub fn store_offset(consumer: &StreamConsumer, source: &SourceOffset) {
    let mut list = TopicPartitionList::new();
    if let Err(err) = list.add_partition_offset(
        &source.topic,
        source.partition,
        rdkafka::Offset::Offset(source.offset + 1),
    ) {
        tracing::error!(error = %err, "building offset list failed");
        return;
    }
    if let Err(err) = consumer.commit(&list, CommitMode::Async) {
        tracing::warn!(error = %err, "offset store failed, event may be redelivered");
    }
}

/// Publish a decision record keyed by user id for downstream partitioning.
pub async fn publish_decision(
    producer: &FutureProducer,
    topic: &str,
    record: &DecisionRecord,
    retry: &RetryPolicy,
) -> Result<(), PipelineError> {
    let body = serde_json::to_string(record)
        .map_err(|e| PipelineError::fatal(format!("decision serialization: {e}")))?;
    retry
        .run("publish_decision", || async {
            producer
                .send(
                    FutureRecord::to(topic).key(&record.user_id).payload(&body),
                    Timeout::After(Duration::from_secs(3)),
                )
                .await
                .map(|_| ())
                .map_err(|(err, _)| PipelineError::transient("bus", err.to_string()))
        })
        .await
}
