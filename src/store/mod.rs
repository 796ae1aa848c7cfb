//! Distributed lock/counter store
//!
//! Overview
//! --------
//! Contract for the key-value store backing the dedup lock and the retry
//! counter. Keys carry an expiring TTL so that a worker crash can never
//! strand a message: the lock self-expires and exactly one redelivered
//! attempt proceeds. Entries live outside process memory, so they serialize
//! work across consumer instances, not just within one process.

use crate::errors::ConveyorError;
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod redis;

pub use memory::MemoryLockStore;
pub use redis::RedisLockStore;

/// Dedup lock key for one delivery of `(topic, message_id)`.
pub fn dedup_key(topic: &str, message_id: &str) -> String {
    format!("rock:{topic}:{message_id}")
}

/// Retry counter key for `(topic, message_id)`.
pub fn retry_key(topic: &str, message_id: &str) -> String {
    format!("retryTime:{topic}:{message_id}")
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire `key` with the given TTL. Returns false when another holder
    /// already owns it.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, ConveyorError>;

    /// Release `key`. Returns false when there was nothing to release
    /// (e.g. the TTL already expired).
    async fn unlock(&self, key: &str) -> Result<bool, ConveyorError>;

    /// Atomically increment `key`, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64, ConveyorError>;

    /// Refresh the TTL on `key`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), ConveyorError>;
}
