//! Environment-driven configuration with safe defaults.
//!
//! Every knob has a default that runs locally; nothing panics at load.
//! Unrecognized `FRAUD_`-prefixed variables are ignored with a warning so a
//! typoed threshold never silently no-ops.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub block: f64,
    pub review: f64,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub enabled: bool,
    pub max_requests_per_minute: u32,
    pub request_delay: Duration,
    pub max_rate_limit_wait: Duration,
    pub max_tool_calls: u32,
    pub run_timeout: Duration,
    pub tool_call_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: String,
    pub topic_input: String,
    pub topic_output: String,
    pub group_id: String,
    pub auto_offset_reset: String,
}

#[derive(Debug, Clone)]
pub struct Ttls {
    pub user_flag: Duration,
    pub ip_flag: Duration,
    pub dedup: Duration,
}

#[derive(Debug, Clone)]
pub struct StageDeadlines {
    pub memory: Duration,
    pub knowledge: Duration,
    pub ml: Duration,
    pub pipeline: Duration,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            memory: Duration::from_millis(500),
            knowledge: Duration::from_secs(1),
            ml: Duration::from_millis(300),
            pipeline: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub thresholds: Thresholds,
    pub agents: AgentSettings,
    pub kafka: KafkaSettings,
    pub ttls: Ttls,
    pub deadlines: StageDeadlines,
    pub velocity_window: Duration,
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub shard_by_user: bool,
    pub database_url: Option<String>,
    pub health_port: u16,
}

const KNOWN_FRAUD_KEYS: &[&str] = &["FRAUD_BLOCK_THRESHOLD", "FRAUD_REVIEW_THRESHOLD"];

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds { block: 0.70, review: 0.40 },
            agents: AgentSettings {
                enabled: true,
                max_requests_per_minute: 20,
                request_delay: Duration::from_secs_f64(3.0),
                max_rate_limit_wait: Duration::from_secs(30),
                max_tool_calls: 8,
                run_timeout: Duration::from_secs(60),
                tool_call_timeout: Duration::from_secs(20),
                openai_api_key: None,
                openai_model: "gpt-4o-mini".to_string(),
            },
            kafka: KafkaSettings {
                brokers: "localhost:9092".to_string(),
                topic_input: "transactions.input".to_string(),
                topic_output: "transactions.decisions".to_string(),
                group_id: "sentra-orchestrator".to_string(),
                auto_offset_reset: "latest".to_string(),
            },
            ttls: Ttls {
                user_flag: Duration::from_secs(86_400),
                ip_flag: Duration::from_secs(604_800),
                dedup: Duration::from_secs(600),
            },
            deadlines: StageDeadlines::default(),
            velocity_window: Duration::from_secs(3600),
            queue_capacity: 1000,
            worker_count: default_worker_count(),
            shard_by_user: false,
            database_url: None,
            health_port: 8080,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let settings = Self {
            thresholds: Thresholds {
                block: env_parse("FRAUD_BLOCK_THRESHOLD", defaults.thresholds.block),
                review: env_parse("FRAUD_REVIEW_THRESHOLD", defaults.thresholds.review),
            },
            agents: AgentSettings {
                enabled: env_bool("USE_AGENTS", defaults.agents.enabled),
                max_requests_per_minute: env_parse(
                    "MAX_AI_REQUESTS_PER_MIN",
                    defaults.agents.max_requests_per_minute,
                ),
                request_delay: Duration::from_secs_f64(env_parse("AI_REQUEST_DELAY_SEC", 3.0)),
                max_rate_limit_wait: Duration::from_secs(env_parse(
                    "AI_MAX_RATE_LIMIT_WAIT_SEC",
                    30,
                )),
                max_tool_calls: env_parse("AGENT_MAX_TOOL_CALLS", defaults.agents.max_tool_calls),
                run_timeout: Duration::from_secs(env_parse("AGENT_TIMEOUT_SECONDS", 60)),
                tool_call_timeout: Duration::from_secs(env_parse("AGENT_TOOL_TIMEOUT_SECONDS", 20)),
                openai_api_key: env::var("OPENAI_API_KEY").ok(),
                openai_model: env::var("OPENAI_MODEL")
                    .unwrap_or(defaults.agents.openai_model),
            },
            kafka: KafkaSettings {
                brokers: env::var("KAFKA_BROKERS").unwrap_or(defaults.kafka.brokers),
                topic_input: env::var("KAFKA_TOPIC_INPUT").unwrap_or(defaults.kafka.topic_input),
                topic_output: env::var("KAFKA_TOPIC_OUTPUT")
                    .unwrap_or(defaults.kafka.topic_output),
                group_id: env::var("KAFKA_GROUP_ID").unwrap_or(defaults.kafka.group_id),
                auto_offset_reset: env::var("KAFKA_AUTO_OFFSET_RESET")
                    .unwrap_or(defaults.kafka.auto_offset_reset),
            },
            ttls: Ttls {
                user_flag: Duration::from_secs(env_parse("USER_FLAG_TTL_SEC", 86_400)),
                ip_flag: Duration::from_secs(env_parse("IP_FLAG_TTL_SEC", 604_800)),
                dedup: Duration::from_secs(env_parse("DEDUP_TTL_SEC", 600)),
            },
            deadlines: StageDeadlines::default(),
            velocity_window: Duration::from_secs(env_parse("VELOCITY_WINDOW_SEC", 3600)),
            queue_capacity: env_parse("QUEUE_CAPACITY", defaults.queue_capacity),
            worker_count: env_parse("WORKER_COUNT", defaults.worker_count),
            shard_by_user: env_bool("SHARD_BY_USER", defaults.shard_by_user),
            database_url: env::var("DATABASE_URL").ok(),
            health_port: env_parse("HEALTH_PORT", defaults.health_port),
        };
        warn_unknown_fraud_keys();
        settings.log_summary();
        settings
    }

    fn log_summary(&self) {
        tracing::info!(
            block_threshold = self.thresholds.block,
            review_threshold = self.thresholds.review,
            agents_enabled = self.agents.enabled,
            workers = self.worker_count,
            queue = self.queue_capacity,
            shard_by_user = self.shard_by_user,
            input_topic = %self.kafka.topic_input,
            output_topic = %self.kafka.topic_output,
            "configuration loaded"
        );
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get() * 2).unwrap_or(4)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparsable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn warn_unknown_fraud_keys() {
    for (key, _) in env::vars() {
        if key.starts_with("FRAUD_") && !KNOWN_FRAUD_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "unknown configuration key ignored");
        }
    }
}
