// tests/it_redis_store.rs
use std::time::Duration;

use testcontainers::core::WaitFor;
use testcontainers::{clients, GenericImage};
use tokio::time::sleep;

use conveyor::store::redis::{init_redis_pool, pool};
use conveyor::store::{dedup_key, retry_key, LockStore, RedisLockStore};

#[tokio::test]
#[ignore] // Run with: cargo test --test it_redis_store -- --ignored
async fn redis_lock_store_end_to_end() {
    // Start Redis 7 in Docker once
    let docker = clients::Cli::default();
    let img = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    let node = docker.run(img);
    let port = node.get_host_port_ipv4(6379);
    let url = format!("redis://127.0.0.1:{port}");

    init_redis_pool(&url).await.unwrap();
    let store = RedisLockStore::new(pool().clone());

    // --- Scenario 1: mutual exclusion and release ---
    let lock = dedup_key("shop", "m1");
    assert!(store.try_lock(&lock, Duration::from_secs(600)).await.unwrap());
    assert!(
        !store.try_lock(&lock, Duration::from_secs(600)).await.unwrap(),
        "second claimant must lose"
    );
    assert!(store.unlock(&lock).await.unwrap());
    assert!(!store.unlock(&lock).await.unwrap(), "nothing left to release");
    assert!(store.try_lock(&lock, Duration::from_secs(600)).await.unwrap());
    store.unlock(&lock).await.unwrap();

    // --- Scenario 2: retry counter with ttl refresh ---
    let counter = retry_key("shop", "m1");
    assert_eq!(store.incr(&counter).await.unwrap(), 1);
    assert_eq!(store.incr(&counter).await.unwrap(), 2);
    store.expire(&counter, Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        store.incr(&counter).await.unwrap(),
        1,
        "counter restarts after ttl expiry"
    );

    // --- Scenario 3: lock self-expires after its ttl ---
    let lock = dedup_key("shop", "m2");
    assert!(store.try_lock(&lock, Duration::from_secs(1)).await.unwrap());
    sleep(Duration::from_millis(1_500)).await;
    assert!(
        store.try_lock(&lock, Duration::from_secs(1)).await.unwrap(),
        "expired lock is claimable again"
    );
}
