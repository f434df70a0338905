//! Durable decision sink (Postgres).

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use sentra_core::decision::DecisionRecord;
use sentra_core::PipelineError;

pub struct DecisionSink {
    pool: PgPool,
}

impl DecisionSink {
    pub async fn connect(database_url: &str) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| PipelineError::fatal(format!("database connect: {e}")))?;
        let sink = Self { pool };
        sink.ensure_schema().await?;
        tracing::info!("decision sink ready");
        Ok(sink)
    }

    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decisions (
                order_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                decision TEXT NOT NULL,
                risk_score DOUBLE PRECISION NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                contributing_factors JSONB NOT NULL,
                agent_trace JSONB,
                reason TEXT,
                raw_event JSONB,
                elapsed_ms BIGINT NOT NULL,
                decided_at TIMESTAMPTZ NOT NULL,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::fatal(format!("schema migration: {e}")))?;
        Ok(())
    }

    /// Idempotent insert: replayed order ids are silently absorbed.
    pub async fn write(
        &self,
        record: &DecisionRecord,
        raw_event: &serde_json::Value,
    ) -> Result<(), PipelineError> {
        let factors = serde_json::to_value(&record.contributing_factors)
            .map_err(|e| PipelineError::fatal(format!("factor serialization: {e}")))?;
        let trace = record
            .agent_trace
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| PipelineError::fatal(format!("trace serialization: {e}")))?;

        sqlx::query(
            "INSERT INTO decisions (
                order_id, user_id, decision, risk_score, confidence,
                contributing_factors, agent_trace, reason, raw_event,
                elapsed_ms, decided_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(&record.order_id)
        .bind(&record.user_id)
        .bind(record.decision.as_str())
        .bind(record.risk_score)
        .bind(record.confidence)
        .bind(factors)
        .bind(trace)
        .bind(&record.reason)
        .bind(raw_event)
        .bind(record.elapsed_ms as i64)
        .bind(record.decided_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::transient("db", e.to_string()))?;
        Ok(())
    }
}
