//! conveyor: worker entrypoint
//!
//! Overview
//! --------
//! Orchestrates a demo consumer worker: wires the registry, broker, and
//! Redis-backed lock store, publishes a handful of job messages, and drives
//! the pull → process → batch-ack loop with graceful shutdown.
//!
//! Responsibilities
//! ----------------
//! - Initialize logging, configuration, and the Redis pool.
//! - Register the demo queue and start the consumer engine.
//!
//! Error Model
//! -----------
//! - Initialization failures are fatal.
//! - Per-message failures are alerted and do not terminate the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::signal;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use conveyor::alert::LogAlertSink;
use conveyor::broker::MemoryBroker;
use conveyor::client::Client;
use conveyor::config::{load_config, ConsumerOptions};
use conveyor::errors::BoxError;
use conveyor::registry::{Job, JobQueue, JobRegistry};
use conveyor::store::redis::{init_redis_pool, pool};
use conveyor::store::RedisLockStore;

pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().compact())
        .with(ErrorLayer::default())
        .init();
}

struct PingJob;

#[async_trait]
impl Job for PingJob {
    fn name(&self) -> &str {
        "PingJob"
    }

    async fn execute(&self, payload: &[u8]) -> Result<(), BoxError> {
        info!(payload = %String::from_utf8_lossy(payload), "ping executed");
        Ok(())
    }
}

struct PingQueue;

impl JobQueue for PingQueue {
    fn topic(&self) -> &str {
        "ping"
    }

    fn group_id(&self) -> &str {
        "GID_ping"
    }

    fn jobs(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::new(PingJob)]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    info!("worker starting");

    let config = load_config().expect("failed to load config");

    init_redis_pool(&config.redis_url).await?;

    let mut registry = JobRegistry::new();
    registry.register(Arc::new(PingQueue))?;

    let client = Client::new(
        config,
        registry,
        Arc::new(MemoryBroker::default()),
        Arc::new(RedisLockStore::new(pool().clone())),
        Arc::new(LogAlertSink),
    );

    for n in 0..4u32 {
        if let Err(e) = client
            .producer()
            .publish_job(&PingJob, &serde_json::json!({ "seq": n }))
            .await
        {
            error!(error = %e, "demo publish failed");
        }
    }
    client
        .producer()
        .publish_job_delayed(
            &PingJob,
            &serde_json::json!({ "seq": "delayed" }),
            Duration::from_secs(2),
        )
        .await?;

    let consumer = client.consumer("ping", ConsumerOptions::default())?;
    let handle = consumer.start();

    signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.shutdown().await;

    Ok(())
}
