//! Broker contract
//!
//! Overview
//! --------
//! Minimal trait describing the message broker this pipeline runs against:
//! long-poll pulls, batched acknowledgments, and immediate or time-delayed
//! publishes. The wire protocol lives behind an SDK adapter implementing
//! this trait; an in-memory implementation backs tests and local runs.

use crate::errors::ConveyorError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryBroker;

/// Message property carrying the consumer group the publisher intended.
/// Consumers drop messages whose declared group is not their own.
pub const PROP_GROUP_ID: &str = "groupId";

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    /// Per-delivery handle used for acknowledgment; expires with the
    /// broker's visibility timeout.
    pub receipt_handle: String,
    pub body: Bytes,
    pub properties: HashMap<String, String>,
}

impl InboundMessage {
    pub fn group_id(&self) -> Option<&str> {
        self.properties.get(PROP_GROUP_ID).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic: String,
    pub body: String,
    /// Used by the broker for routing/tracing; mirrors the topic here.
    pub message_key: String,
    pub properties: HashMap<String, String>,
    /// Absolute unix-millis delivery time for delayed messages.
    pub start_deliver_time_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AckEntry {
    pub message_id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct AckFailure {
    pub receipt_handle: String,
    pub reason: String,
}

/// Result of a batched ack call; `failed` lists the handles the broker
/// rejected (typically expired) while the rest succeeded.
#[derive(Debug, Clone, Default)]
pub struct AckOutcome {
    pub failed: Vec<AckFailure>,
}

impl AckOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Long poll for up to `batch` messages, blocking up to `wait`.
    /// An empty result is not an error.
    async fn pull(
        &self,
        topic: &str,
        group: &str,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, ConveyorError>;

    /// Acknowledge a batch of deliveries by receipt handle.
    async fn ack(
        &self,
        topic: &str,
        group: &str,
        entries: &[AckEntry],
    ) -> Result<AckOutcome, ConveyorError>;

    /// Publish a message, returning its broker-assigned id.
    async fn publish(&self, request: PublishRequest) -> Result<String, ConveyorError>;
}
