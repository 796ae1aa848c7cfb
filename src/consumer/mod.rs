//! Consumer engine: pull loop + worker pool + batched acknowledgment.
//!
//! Overview
//! --------
//! One continuous pull task long-polls the broker and feeds a bounded
//! worker pool. Each worker handles exactly one message: group filter,
//! distributed dedup lock, retry accounting, envelope decode, execution
//! inside a panic boundary, and finally disposition into the shared ack
//! buffer. A periodic flusher drains the buffer in bounded batches; a
//! drain task surfaces pull errors to the alert sink.
//!
//! Error Model
//! -----------
//! - Per-message failures never terminate the loop or the pool.
//! - Transient broker errors are alerted and retried after a short backoff.
//! - A failed handler leaves its message unacknowledged; the broker
//!   redelivers it after the visibility timeout, bounded by the retry
//!   budget and the counter TTL.
//!
//! Concurrency
//! -----------
//! The ack buffer is the only cross-worker shared mutable state; its lock
//! is held only around append/drain, never across a network call. Dedup
//! locks and retry counters live in the external store and serialize work
//! across consumer instances, not just within this process.

use crate::alert::Alerter;
use crate::broker::{AckEntry, Broker, InboundMessage};
use crate::codec::EnvelopeCodec;
use crate::config::ConsumerOptions;
use crate::errors::ConveyorError;
use crate::registry::Job;
use crate::store::{dedup_key, retry_key, LockStore};
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// A delivery that failed execution and was left for broker redelivery.
/// Kept in a bounded ring for inspection; the oldest entry is evicted once
/// the ring is full.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

struct Inner {
    broker: Arc<dyn Broker>,
    store: Arc<dyn LockStore>,
    codec: EnvelopeCodec,
    alerter: Alerter,
    topic: String,
    group: String,
    opts: ConsumerOptions,
    ack_buffer: Mutex<Vec<AckEntry>>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
}

/// Handle to a running consumer. Shutdown stops the pull loop, drains
/// in-flight workers, and performs a final synchronous flush.
pub struct ConsumerHandle {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = ?e, "consumer join error");
        }
    }
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn LockStore>,
        codec: EnvelopeCodec,
        alerter: Alerter,
        topic: String,
        group: String,
        opts: ConsumerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                store,
                codec,
                alerter,
                topic,
                group,
                opts,
                ack_buffer: Mutex::new(Vec::new()),
                dead_letters: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// The environment-qualified group this instance consumes as.
    pub fn group(&self) -> &str {
        &self.inner.group
    }

    pub fn start(&self) -> ConsumerHandle {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let inner = self.inner.clone();
        let join = tokio::spawn(async move { inner.run(stop_rx).await });
        ConsumerHandle { stop_tx, join }
    }

    /// Snapshot of recently failed deliveries awaiting broker redelivery.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Entries currently waiting for the next flush.
    pub async fn pending_acks(&self) -> usize {
        self.inner.ack_buffer.lock().await.len()
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut stop_rx: mpsc::Receiver<()>) {
        let (msg_tx, mut msg_rx) = mpsc::channel(self.opts.pull_batch.max(1));
        let (err_tx, err_rx) = mpsc::channel(16);
        let (flush_stop_tx, flush_stop_rx) = mpsc::channel(1);

        let pull = tokio::spawn(Self::pull_loop(self.clone(), msg_tx, err_tx));
        let flusher = tokio::spawn(Self::flush_loop(self.clone(), flush_stop_rx));
        let drainer = tokio::spawn(Self::drain_pull_errors(
            self.alerter.clone(),
            err_rx,
        ));

        let semaphore = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!(topic = %self.topic, "consumer stopping; draining workers");
                    break;
                }
                received = msg_rx.recv() => {
                    let Some(msg) = received else { break };
                    // Backpressure: dispatch waits here once the pool is
                    // saturated, which in turn paces the pull loop through
                    // the bounded channel.
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("worker semaphore closed");
                    let inner = self.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        inner.process_message(msg).await;
                    });
                }
                Some(res) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = res {
                        error!(error = ?e, "worker task join error");
                    }
                }
            }
        }

        pull.abort();
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!(error = ?e, "worker task join error during drain");
            }
        }
        let _ = flush_stop_tx.send(()).await;
        if let Err(e) = flusher.await {
            error!(error = ?e, "flusher join error");
        }
        self.flush_remaining().await;
        let _ = drainer.await;
    }

    async fn pull_loop(
        inner: Arc<Self>,
        msg_tx: mpsc::Sender<InboundMessage>,
        err_tx: mpsc::Sender<ConveyorError>,
    ) {
        loop {
            let pulled = inner
                .broker
                .pull(
                    &inner.topic,
                    &inner.group,
                    inner.opts.pull_batch,
                    inner.opts.pull_wait,
                )
                .await;
            match pulled {
                Ok(messages) => {
                    for msg in messages {
                        if msg_tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    if err_tx.send(e).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(inner.opts.pull_backoff).await;
                }
            }
        }
    }

    async fn drain_pull_errors(alerter: Alerter, mut err_rx: mpsc::Receiver<ConveyorError>) {
        while let Some(err) = err_rx.recv().await {
            alerter.notify(&format!("message pull failed: {err}")).await;
        }
    }

    /// One message, start to finish, on a worker slot. The order is fixed:
    /// lock, retry count, decode, execute, disposition; the lock is
    /// released last regardless of outcome.
    async fn process_message(&self, msg: InboundMessage) {
        if msg.group_id() != Some(self.group.as_str()) {
            debug!(message_id = %msg.message_id, "dropping message for foreign group");
            return;
        }

        let lock_key = dedup_key(&self.topic, &msg.message_id);
        let lock_held = match self.store.try_lock(&lock_key, self.opts.lock_ttl).await {
            Ok(true) => true,
            Ok(false) => {
                let err = ConveyorError::DuplicateDelivery(msg.message_id.clone());
                self.alerter.notify(&format!("key {lock_key}: {err}")).await;
                self.enqueue_ack(&msg).await;
                return;
            }
            Err(e) => {
                // Store outage: process without the dedup guard rather than
                // stall the message until the outage ends.
                self.alerter
                    .notify(&format!("dedup lock unavailable for {lock_key}: {e}"))
                    .await;
                false
            }
        };

        self.handle_message(&msg).await;

        if lock_held {
            match self.store.unlock(&lock_key).await {
                Ok(true) => {}
                Ok(false) => {
                    self.alerter
                        .notify(&format!(
                            "lock {lock_key} for message {} already gone at release",
                            msg.message_id
                        ))
                        .await;
                }
                Err(e) => {
                    self.alerter
                        .notify(&format!("failed to release lock {lock_key}: {e}"))
                        .await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: &InboundMessage) {
        let retry_key = retry_key(&self.topic, &msg.message_id);
        match self.store.incr(&retry_key).await {
            Ok(times) => {
                if let Err(e) = self.store.expire(&retry_key, self.opts.lock_ttl).await {
                    warn!(error = %e, key = %retry_key, "failed to refresh retry counter ttl");
                }
                if self.opts.max_retries > 0 && times > self.opts.max_retries {
                    let err = ConveyorError::PoisonMessage {
                        message_id: msg.message_id.clone(),
                        max_retries: self.opts.max_retries,
                    };
                    self.alerter.notify(&err.to_string()).await;
                    self.enqueue_ack(msg).await;
                    return;
                }
            }
            Err(e) => {
                self.alerter
                    .notify(&format!("retry counter unavailable for {retry_key}: {e}"))
                    .await;
            }
        }

        let mut acked = false;
        if self.opts.max_retries == 0 {
            // Fire-and-forget: the ack is queued before execution starts,
            // so a failing handler cannot hold the message back.
            self.enqueue_ack(msg).await;
            acked = true;
        }

        if !self.codec.is_routed(&msg.body) {
            // Plain traffic on a shared topic is not this consumer's concern.
            if !acked {
                self.enqueue_ack(msg).await;
            }
            return;
        }

        let failed = match self.codec.decode(&msg.body) {
            Ok((job, payload)) => self.execute_job(job, payload, msg).await,
            Err(e) => {
                // Non-actionable: without a decodable envelope there is
                // nothing to retry, so redelivery is stopped.
                self.alerter
                    .notify(&format!("message {} not executed: {e}", msg.message_id))
                    .await;
                false
            }
        };

        if failed {
            self.record_dead_letter(msg).await;
            return;
        }
        if !acked {
            self.enqueue_ack(msg).await;
        }
    }

    /// Run the handler inside a panic boundary. A panicking job is recorded
    /// as a failure like any handler error; it cannot take down the pool.
    async fn execute_job(&self, job: Arc<dyn Job>, payload: Bytes, msg: &InboundMessage) -> bool {
        let job_name = job.name().to_string();
        let run = {
            let payload = payload.clone();
            async move { job.execute(&payload).await }
        };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                let err = ConveyorError::JobFailed {
                    job: job_name,
                    reason: e.to_string(),
                };
                self.alerter
                    .notify(&format!(
                        "message {}: {err}; payload: {}",
                        msg.message_id,
                        String::from_utf8_lossy(&payload)
                    ))
                    .await;
                true
            }
            Err(panic) => {
                let err = ConveyorError::JobFailed {
                    job: job_name,
                    reason: panic_reason(panic.as_ref()),
                };
                self.alerter
                    .notify(&format!(
                        "message {}: {err} (panicked); payload: {}",
                        msg.message_id,
                        String::from_utf8_lossy(&payload)
                    ))
                    .await;
                true
            }
        }
    }

    async fn enqueue_ack(&self, msg: &InboundMessage) {
        let mut buffer = self.ack_buffer.lock().await;
        buffer.push(AckEntry {
            message_id: msg.message_id.clone(),
            receipt_handle: msg.receipt_handle.clone(),
        });
    }

    async fn record_dead_letter(&self, msg: &InboundMessage) {
        let mut letters = self.dead_letters.lock().await;
        if letters.len() >= self.opts.dead_letter_capacity.max(1) {
            if let Some(dropped) = letters.pop_front() {
                warn!(
                    message_id = %dropped.message_id,
                    "dead letter buffer full; dropping oldest entry"
                );
            }
        }
        letters.push_back(DeadLetter {
            message_id: msg.message_id.clone(),
            receipt_handle: msg.receipt_handle.clone(),
            body: msg.body.clone(),
        });
    }

    async fn flush_loop(inner: Arc<Self>, mut stop_rx: mpsc::Receiver<()>) {
        let mut ticker = interval(inner.opts.batch_ack_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if inner.flush_once().await.is_err() {
                        // Some receipt handles may have expired; cool down
                        // before the next attempt.
                        tokio::time::sleep(inner.opts.ack_failure_cooldown).await;
                    }
                }
                _ = stop_rx.recv() => break,
            }
        }
    }

    /// Drain up to one batch from the ack buffer and acknowledge it.
    /// Drained entries are not requeued on failure: the broker will
    /// redeliver them, which is the accepted bounded-duplicate trade-off.
    async fn flush_once(&self) -> Result<usize, ConveyorError> {
        let drained: Vec<AckEntry> = {
            let mut buffer = self.ack_buffer.lock().await;
            let take = buffer.len().min(self.opts.ack_batch_size);
            if take == 0 {
                return Ok(0);
            }
            buffer.drain(..take).collect()
        };

        let count = drained.len();
        match self.broker.ack(&self.topic, &self.group, &drained).await {
            Ok(outcome) if outcome.is_complete() => {
                info!(topic = %self.topic, count, "acknowledged batch");
                Ok(count)
            }
            Ok(outcome) => {
                let err = ConveyorError::AckBatch(format!(
                    "{} of {count} entries rejected: {:?}",
                    outcome.failed.len(),
                    outcome.failed
                ));
                self.alerter.notify(&err.to_string()).await;
                Err(err)
            }
            Err(e) => {
                let ids: Vec<&str> = drained.iter().map(|e| e.message_id.as_str()).collect();
                let err = ConveyorError::AckBatch(format!("messages {ids:?}: {e}"));
                self.alerter.notify(&err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Final flush on shutdown: drain everything in batch-sized chunks.
    /// Failed batches are already dropped by `flush_once`, so this always
    /// terminates.
    async fn flush_remaining(&self) {
        loop {
            match self.flush_once().await {
                Ok(0) => break,
                Ok(_) | Err(_) => {}
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".into()
    }
}
