//! Operational alert sink
//!
//! The sink is injected explicitly into the client, producer, and consumer
//! rather than resolved from shared global state. Notification is
//! fire-and-log: a failure to deliver an alert is itself only logged and
//! never propagates into the calling path.

use crate::errors::BoxError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), BoxError>;
}

/// Default sink: alerts go to the log only.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, _message: &str) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Scoped wrapper around the sink. Every alert is logged at error level
/// first, then forwarded.
#[derive(Clone)]
pub struct Alerter {
    sink: Arc<dyn AlertSink>,
    scope: &'static str,
}

impl Alerter {
    pub fn new(sink: Arc<dyn AlertSink>, scope: &'static str) -> Self {
        Self { sink, scope }
    }

    /// Same sink under a different scope label.
    pub fn scoped(&self, scope: &'static str) -> Self {
        Self {
            sink: self.sink.clone(),
            scope,
        }
    }

    pub async fn notify(&self, message: &str) {
        let message = format!("[{}] {}", self.scope, message);
        error!("{message}");
        if let Err(e) = self.sink.notify(&message).await {
            error!(error = %e, "alert sink delivery failed");
        }
    }
}
