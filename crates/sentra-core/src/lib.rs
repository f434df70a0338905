//! # Sentra Core
//!
//! Domain model and in-process detection stages for the Sentra
//! fraud-detection pipeline:
//! - transaction event schema and validation
//! - decision records and contributing factors
//! - the velocity pattern detector
//! - feature extraction and the anomaly-scoring model adapter
//! - score fusion, confidence, triage and deterministic overrides
//! - circuit breakers and the retry policy

pub mod circuit;
pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod features;
pub mod fusion;
pub mod metrics;
pub mod ml;
pub mod reputation;
pub mod retry;
pub mod velocity;

pub use circuit::{BreakerRegistry, CircuitBreaker, CircuitConfig, CircuitState};
pub use config::Settings;
pub use decision::{
    AgentRunStatus, AgentTrace, ContributingFactor, Decision, DecisionRecord, Severity,
};
pub use error::PipelineError;
pub use event::{PaymentMethod, TransactionEvent};
pub use features::{rolling_stats, FeatureVector, RollingStats, FEATURE_DIM};
pub use fusion::{fuse, triage, FusedScore, OverrideInputs, SignalInputs, SimilarCase, Triage};
pub use metrics::{PipelineMetrics, Stage};
pub use ml::{IsolationScorer, ScoringModel};
pub use reputation::{FlagReason, IpReputation, UserReputation};
pub use retry::RetryPolicy;
pub use velocity::{detect_velocity, VelocityFinding, VelocityPattern, WindowEntry};
