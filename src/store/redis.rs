//! Redis-backed lock/counter store (single version of `redis` via deadpool-redis)

use super::LockStore;
use crate::errors::ConveyorError;
use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};
use once_cell::sync::OnceCell;
use std::time::Duration;

static REDIS_POOL: OnceCell<Pool> = OnceCell::new();

pub async fn init_redis_pool(redis_url: &str) -> Result<(), ConveyorError> {
    let cfg = Config::from_url(redis_url);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| ConveyorError::Store(e.to_string()))?;
    REDIS_POOL
        .set(pool)
        .map_err(|_| ConveyorError::Store("pool already initialized".into()))?;
    Ok(())
}

pub fn pool() -> &'static Pool {
    REDIS_POOL.get().expect("pool not initialized")
}

/// Borrow a pooled connection and run the provided async action.
/// Maps pool errors into `ConveyorError` at the edge.
async fn with_conn<T, F, Fut>(pool: &Pool, f: F) -> Result<T, ConveyorError>
where
    F: FnOnce(deadpool_redis::Connection) -> Fut,
    Fut: std::future::Future<Output = Result<T, ConveyorError>>,
{
    let conn = pool
        .get()
        .await
        .map_err(|e| ConveyorError::Store(e.to_string()))?;
    f(conn).await
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[derive(Clone)]
pub struct RedisLockStore {
    pool: Pool,
}

impl RedisLockStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    #[tracing::instrument(skip(self, ttl))]
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, ConveyorError> {
        let secs = ttl_secs(ttl);
        with_conn(&self.pool, |mut c| async move {
            // SETNX: set only if not exists
            let first: bool = c
                .set_nx(key, 1)
                .await
                .map_err(|e| ConveyorError::Store(e.to_string()))?;

            if !first {
                return Ok(false);
            }

            let _: () = c
                .expire(key, secs)
                .await
                .map_err(|e| ConveyorError::Store(e.to_string()))?;

            Ok(true)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn unlock(&self, key: &str) -> Result<bool, ConveyorError> {
        with_conn(&self.pool, |mut c| async move {
            let removed: i64 = c
                .del(key)
                .await
                .map_err(|e| ConveyorError::Store(e.to_string()))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64, ConveyorError> {
        with_conn(&self.pool, |mut c| async move {
            let value: i64 = c
                .incr(key, 1)
                .await
                .map_err(|e| ConveyorError::Store(e.to_string()))?;
            Ok(value)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), ConveyorError> {
        let secs = ttl_secs(ttl);
        with_conn(&self.pool, |mut c| async move {
            let _: () = c
                .expire(key, secs)
                .await
                .map_err(|e| ConveyorError::Store(e.to_string()))?;
            Ok(())
        })
        .await
    }
}
