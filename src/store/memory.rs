//! In-process lock/counter store for tests and local worker runs.
//!
//! Serializes only within one process, which is exactly the scope a single
//! test or demo needs. TTLs are honored lazily on access.

use super::LockStore;
use crate::errors::ConveyorError;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, ConveyorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock store state");
        if entries.get(key).is_some_and(|e| !e.expired(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: 1,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<bool, ConveyorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock store state");
        match entries.remove(key) {
            Some(entry) => Ok(!entry.expired(now)),
            None => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, ConveyorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock store state");
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if entry.expired(now) {
            entry.value = 0;
            entry.expires_at = None;
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), ConveyorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock store state");
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }
}
