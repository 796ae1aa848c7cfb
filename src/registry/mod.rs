//! Job registry
//!
//! Overview
//! --------
//! Maps logical job names to their implementations and to the queue
//! (topic + consumer group) each job is fed from. Built once at startup and
//! read-only afterwards; both the producer (encode side) and the consumer
//! (decode side) resolve jobs through it.

use crate::errors::{BoxError, ConveyorError};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A unit of work executed for one message payload.
///
/// `execute` may be invoked concurrently from multiple worker slots for
/// different in-flight messages of the same job type, so implementations
/// must not rely on exclusive access to shared state.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, payload: &[u8]) -> Result<(), BoxError>;
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("name", &self.name()).finish()
    }
}

/// A logical queue: a broker topic plus the consumer group reading from it,
/// declaring which jobs it feeds.
pub trait JobQueue: Send + Sync {
    fn topic(&self) -> &str;

    fn group_id(&self) -> &str;

    fn jobs(&self) -> Vec<Arc<dyn Job>>;
}

struct RegisteredJob {
    job: Arc<dyn Job>,
    queue: Arc<dyn JobQueue>,
}

#[derive(Default)]
pub struct JobRegistry {
    queues: FxHashMap<String, Arc<dyn JobQueue>>,
    jobs: FxHashMap<String, RegisteredJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue and every job it declares. Duplicate topics or job
    /// names are construction errors, not runtime surprises.
    pub fn register(&mut self, queue: Arc<dyn JobQueue>) -> Result<(), ConveyorError> {
        let topic = queue.topic().to_string();
        if topic.is_empty() {
            return Err(ConveyorError::Registry("queue topic is empty".into()));
        }
        if self.queues.contains_key(&topic) {
            return Err(ConveyorError::Registry(format!(
                "topic {topic} registered twice"
            )));
        }

        for job in queue.jobs() {
            let name = job.name().to_string();
            if self.jobs.contains_key(&name) {
                return Err(ConveyorError::Registry(format!(
                    "job {name} registered twice"
                )));
            }
            self.jobs.insert(
                name,
                RegisteredJob {
                    job,
                    queue: queue.clone(),
                },
            );
        }

        self.queues.insert(topic, queue);
        Ok(())
    }

    pub fn queue_for_topic(&self, topic: &str) -> Option<&Arc<dyn JobQueue>> {
        self.queues.get(topic)
    }

    pub fn job(&self, name: &str) -> Option<&Arc<dyn Job>> {
        self.jobs.get(name).map(|r| &r.job)
    }

    pub fn queue_for_job(&self, name: &str) -> Option<&Arc<dyn JobQueue>> {
        self.jobs.get(name).map(|r| &r.queue)
    }
}
