//! Producer: immediate and time-delayed publishing, raw or job-routed.

use crate::alert::Alerter;
use crate::broker::{Broker, PublishRequest, PROP_GROUP_ID};
use crate::client::GroupNaming;
use crate::codec::EnvelopeCodec;
use crate::errors::ConveyorError;
use crate::registry::Job;
use crate::util::time::now_unix_millis;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    codec: EnvelopeCodec,
    naming: GroupNaming,
    alerter: Alerter,
}

impl Producer {
    pub fn new(
        broker: Arc<dyn Broker>,
        codec: EnvelopeCodec,
        naming: GroupNaming,
        alerter: Alerter,
    ) -> Self {
        Self {
            broker,
            codec,
            naming,
            alerter,
        }
    }

    /// Publish a job-routed message to the topic the job was registered
    /// under. Returns the broker-assigned message id.
    pub async fn publish_job<T>(&self, job: &dyn Job, payload: &T) -> Result<String, ConveyorError>
    where
        T: Serialize + ?Sized,
    {
        let (topic, body) = self.codec.encode(job, payload)?;
        self.send(self.request(&topic, "", body, None)).await
    }

    /// Job-routed publish delivered no earlier than `delay` from now.
    pub async fn publish_job_delayed<T>(
        &self,
        job: &dyn Job,
        payload: &T,
        delay: Duration,
    ) -> Result<String, ConveyorError>
    where
        T: Serialize + ?Sized,
    {
        let (topic, body) = self.codec.encode(job, payload)?;
        let deliver_at = now_unix_millis() + delay.as_millis() as i64;
        self.send(self.request(&topic, "", body, Some(deliver_at)))
            .await
    }

    /// Raw publish bypassing the job registry, for interop with non-job
    /// consumers sharing the topic.
    pub async fn publish<T>(
        &self,
        topic: &str,
        group_id: &str,
        payload: &T,
    ) -> Result<String, ConveyorError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(payload)
            .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?;
        self.send(self.request(topic, group_id, body, None)).await
    }

    pub async fn publish_delayed<T>(
        &self,
        topic: &str,
        group_id: &str,
        payload: &T,
        delay: Duration,
    ) -> Result<String, ConveyorError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(payload)
            .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?;
        let deliver_at = now_unix_millis() + delay.as_millis() as i64;
        self.send(self.request(topic, group_id, body, Some(deliver_at)))
            .await
    }

    fn request(
        &self,
        topic: &str,
        group_id: &str,
        body: String,
        start_deliver_time_ms: Option<i64>,
    ) -> PublishRequest {
        // An unset group falls back to the topic, which the naming layer
        // resolves through the registered queue.
        let group_id = if group_id.is_empty() { topic } else { group_id };
        let mut properties = HashMap::new();
        properties.insert(
            PROP_GROUP_ID.to_string(),
            self.naming.group_name_for_topic(group_id),
        );
        PublishRequest {
            topic: topic.to_string(),
            body,
            message_key: topic.to_string(),
            properties,
            start_deliver_time_ms,
        }
    }

    /// Failures are reported with the attempted request for diagnosis and
    /// returned to the caller; retrying is the caller's decision.
    async fn send(&self, request: PublishRequest) -> Result<String, ConveyorError> {
        match self.broker.publish(request.clone()).await {
            Ok(message_id) => {
                info!(topic = %request.topic, %message_id, "message published");
                Ok(message_id)
            }
            Err(e) => {
                self.alerter
                    .notify(&format!(
                        "publish to topic {} failed: {e}; body: {}",
                        request.topic, request.body
                    ))
                    .await;
                Err(e)
            }
        }
    }
}
