//! # Sentra Daemon
//!
//! Wires the pipeline together: Kafka in, orchestrated decision per event,
//! Kafka and Postgres out, with a health/metrics surface on the side.

pub mod bus;
pub mod http;
pub mod orchestrator;
pub mod sink;
pub mod worker;

pub use orchestrator::{Orchestrator, ProcessOutcome};
pub use worker::{Job, JobHandler, SourceOffset, WorkerPool};
