use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Deployment environment of the application ("prod" disables group
    /// suffixing).
    pub app_env: String,
    /// Environment tag appended to consumer-group names outside production.
    pub mq_env: String,
    pub redis_url: String,
}

pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    dotenv().ok();
    let app_env = env::var("APP_ENV")?;
    let mq_env = env::var("MQ_ENV")?;
    let redis_url = env::var("REDIS_URL")?;
    Ok(Config {
        app_env,
        mq_env,
        redis_url,
    })
}

/// Tuning knobs for one consumer instance. Fixed at construction; there is
/// no runtime reconfiguration.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Worker pool size: upper bound on concurrently processed messages.
    pub concurrency: usize,
    /// Redelivery budget per message. Zero switches the consumer to
    /// fire-and-forget: every message is acknowledged before execution.
    pub max_retries: i64,
    /// Max messages requested per long poll.
    pub pull_batch: usize,
    /// Long-poll wait passed to the broker.
    pub pull_wait: Duration,
    /// Pause after a failed pull before polling again.
    pub pull_backoff: Duration,
    /// Period of the batched acknowledgment flusher.
    pub batch_ack_interval: Duration,
    /// Max entries drained per acknowledgment call.
    pub ack_batch_size: usize,
    /// TTL of the dedup lock and the retry counter in the external store.
    pub lock_ttl: Duration,
    /// Cooldown after a failed ack batch; some receipt handles may have
    /// expired and are unrecoverable.
    pub ack_failure_cooldown: Duration,
    /// Capacity of the in-memory dead-letter ring; oldest entries are
    /// evicted once full.
    pub dead_letter_capacity: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retries: 3,
            pull_batch: 16,
            pull_wait: Duration::from_secs(30),
            pull_backoff: Duration::from_millis(500),
            batch_ack_interval: Duration::from_millis(200),
            ack_batch_size: 16,
            lock_ttl: Duration::from_secs(600),
            ack_failure_cooldown: Duration::from_secs(3),
            dead_letter_capacity: 256,
        }
    }
}

impl ConsumerOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_batch_ack_interval(mut self, interval: Duration) -> Self {
        self.batch_ack_interval = interval;
        self
    }

    pub fn with_ack_batch_size(mut self, size: usize) -> Self {
        self.ack_batch_size = size.max(1);
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }
}
