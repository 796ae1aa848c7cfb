//! Error types for conveyor
//!
//! Overview
//! --------
//! Canonical error enumeration used across the broker, store, codec, and
//! consumer layers. Keep variants stable and descriptive; prefer mapping
//! external libraries into these variants at module boundaries.
//!
//! Usage
//! -----
//! - Convert low-level errors at the edge (e.g., Redis, broker SDK, serde).
//! - Avoid leaking third-party error types across crate boundaries.
//!
//! Concurrency / Logging
//! ---------------------
//! Errors are `Send + Sync` and implement Display via `thiserror`.
//! Use `tracing` for context at call sites (`error!(...);`).
//!
//! None of these variants is fatal to a running consumer: broker and store
//! failures heal via TTL expiry and redelivery, the rest are surfaced through
//! the alert sink.
use thiserror::Error;

/// Boxed error type carried by job handlers and alert sinks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ConveyorError {
    /// Pull/ack/publish network or protocol failure. The consumer loop logs
    /// it, backs off briefly, and keeps polling.
    #[error("broker error: {0}")]
    Broker(String),

    /// Lock/counter store command or connection failure.
    #[error("lock store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(String),

    /// A job was published or decoded with no queue registered for it.
    #[error("job {0} has no registered queue")]
    UnregisteredQueue(String),

    /// Envelope named a job the registry does not know.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Inbound body carried the routing marker but did not deserialize.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Dedup lock was already held: the same message id is being processed
    /// elsewhere in the fleet. Expected under overlapping redelivery.
    #[error("duplicate delivery of message {0}")]
    DuplicateDelivery(String),

    /// Retry counter exceeded the configured budget; the message is
    /// force-acknowledged to stop redelivery.
    #[error("message {message_id} exceeded retry budget of {max_retries}")]
    PoisonMessage { message_id: String, max_retries: i64 },

    /// Handler returned an error or panicked. The message is left
    /// unacknowledged so the broker redelivers it.
    #[error("job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    /// Partial or total failure of a batched acknowledgment call.
    #[error("ack batch failed: {0}")]
    AckBatch(String),

    #[error("unknown error: {0}")]
    Unknown(#[from] BoxError),
}
