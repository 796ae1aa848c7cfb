//! In-process broker with visibility-timeout redelivery semantics.
//!
//! Stands in for the real broker SDK in tests and local worker runs. It
//! models the parts of the contract the pipeline depends on: delayed
//! delivery, per-delivery receipt handles, redelivery of unacknowledged
//! messages after the visibility timeout, and per-handle ack failures.
//! Group isolation is not modeled; messages carry the publisher's group
//! property and consumers filter on it.

use super::{AckEntry, AckFailure, AckOutcome, Broker, InboundMessage, PublishRequest};
use crate::errors::ConveyorError;
use crate::util::time::now_unix_millis;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Stored {
    message_id: String,
    body: Bytes,
    properties: HashMap<String, String>,
    deliver_at: Instant,
    attempts: u32,
}

#[derive(Default)]
struct TopicQueue {
    ready: VecDeque<Stored>,
    inflight: FxHashMap<String, Inflight>,
}

struct Inflight {
    message: Stored,
    redeliver_at: Instant,
}

pub struct MemoryBroker {
    visibility: Duration,
    poll_step: Duration,
    next_id: AtomicU64,
    topics: Mutex<FxHashMap<String, TopicQueue>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl MemoryBroker {
    pub fn new(visibility: Duration) -> Self {
        Self {
            visibility,
            poll_step: Duration::from_millis(10),
            next_id: AtomicU64::new(1),
            topics: Mutex::new(FxHashMap::default()),
        }
    }

    /// Messages delivered but not yet acknowledged on `topic`.
    pub fn inflight_len(&self, topic: &str) -> usize {
        let topics = self.topics.lock().expect("memory broker state");
        topics.get(topic).map_or(0, |q| q.inflight.len())
    }

    /// Take up to `batch` due messages off the ready queue, moving them
    /// in-flight under fresh receipt handles.
    fn take_ready(&self, topic: &str, batch: usize) -> Vec<InboundMessage> {
        let now = Instant::now();
        let mut topics = self.topics.lock().expect("memory broker state");
        let queue = topics.entry(topic.to_string()).or_default();

        // Expired in-flight deliveries go back to the front of the line.
        let expired: Vec<String> = queue
            .inflight
            .iter()
            .filter(|(_, inflight)| inflight.redeliver_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(inflight) = queue.inflight.remove(&handle) {
                queue.ready.push_front(inflight.message);
            }
        }

        let mut out = Vec::new();
        let mut skipped = VecDeque::new();
        while out.len() < batch {
            let Some(mut msg) = queue.ready.pop_front() else {
                break;
            };
            if msg.deliver_at > now {
                skipped.push_back(msg);
                continue;
            }
            msg.attempts += 1;
            let receipt_handle = format!("{}:{}", msg.message_id, msg.attempts);
            out.push(InboundMessage {
                message_id: msg.message_id.clone(),
                receipt_handle: receipt_handle.clone(),
                body: msg.body.clone(),
                properties: msg.properties.clone(),
            });
            queue.inflight.insert(
                receipt_handle,
                Inflight {
                    message: msg,
                    redeliver_at: now + self.visibility,
                },
            );
        }
        queue.ready.extend(skipped);
        out
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn pull(
        &self,
        topic: &str,
        _group: &str,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, ConveyorError> {
        let deadline = Instant::now() + wait;
        loop {
            let out = self.take_ready(topic, batch.max(1));
            if !out.is_empty() {
                return Ok(out);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_step).await;
        }
    }

    async fn ack(
        &self,
        topic: &str,
        _group: &str,
        entries: &[AckEntry],
    ) -> Result<AckOutcome, ConveyorError> {
        let mut topics = self.topics.lock().expect("memory broker state");
        let queue = topics.entry(topic.to_string()).or_default();

        let mut outcome = AckOutcome::default();
        for entry in entries {
            if queue.inflight.remove(&entry.receipt_handle).is_none() {
                outcome.failed.push(AckFailure {
                    receipt_handle: entry.receipt_handle.clone(),
                    reason: "receipt handle not in flight".into(),
                });
            }
        }
        Ok(outcome)
    }

    async fn publish(&self, request: PublishRequest) -> Result<String, ConveyorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message_id = format!("mem-{id:08}");

        let deliver_at = match request.start_deliver_time_ms {
            Some(at_ms) => {
                let delay = (at_ms - now_unix_millis()).max(0) as u64;
                Instant::now() + Duration::from_millis(delay)
            }
            None => Instant::now(),
        };

        let mut topics = self.topics.lock().expect("memory broker state");
        let queue = topics.entry(request.topic).or_default();
        queue.ready.push_back(Stored {
            message_id: message_id.clone(),
            body: Bytes::from(request.body),
            properties: request.properties,
            deliver_at,
            attempts: 0,
        });
        Ok(message_id)
    }
}
