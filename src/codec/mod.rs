//! Envelope codec
//!
//! Overview
//! --------
//! Wraps job payloads in a routing envelope so that any topic can carry
//! job-dispatched traffic next to plain messages. The wire body is a fixed
//! marker, a separator, and the JSON-serialized envelope. Inbound bodies
//! without the marker are plain messages and bypass job routing entirely.

use crate::errors::ConveyorError;
use crate::registry::{Job, JobRegistry};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ENVELOPE_MARK: &str = "queueJob";
pub const MARK_SEPARATOR: char = '|';

/// Wire-level routing wrapper around a job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub topic: String,
    pub group_id: String,
    pub job_name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<JobRegistry>,
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Encode a payload for `job` into `(topic, wire body)`. The topic and
    /// group come from the queue the job was registered under.
    pub fn encode<T>(&self, job: &dyn Job, payload: &T) -> Result<(String, String), ConveyorError>
    where
        T: Serialize + ?Sized,
    {
        let name = job.name();
        let queue = self
            .registry
            .queue_for_job(name)
            .ok_or_else(|| ConveyorError::UnregisteredQueue(name.to_string()))?;

        let envelope = Envelope {
            topic: queue.topic().to_string(),
            group_id: queue.group_id().to_string(),
            job_name: name.to_string(),
            data: serde_json::to_value(payload)
                .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?,
        };
        let body = serde_json::to_string(&envelope)
            .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?;

        Ok((
            envelope.topic,
            format!("{ENVELOPE_MARK}{MARK_SEPARATOR}{body}"),
        ))
    }

    /// True iff the body carries the routing marker prefix.
    pub fn is_routed(&self, body: &[u8]) -> bool {
        let mark = ENVELOPE_MARK.as_bytes();
        body.len() > mark.len() && body.starts_with(mark) && body[mark.len()] == MARK_SEPARATOR as u8
    }

    /// Strip the marker, deserialize the envelope, and resolve the job.
    /// Returns the job and the payload re-serialized to raw bytes.
    pub fn decode(&self, body: &[u8]) -> Result<(Arc<dyn Job>, Bytes), ConveyorError> {
        if body.is_empty() {
            return Err(ConveyorError::MalformedEnvelope("empty message body".into()));
        }
        let text = std::str::from_utf8(body)
            .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?;
        let sep = text
            .find(MARK_SEPARATOR)
            .ok_or_else(|| ConveyorError::MalformedEnvelope("missing routing marker".into()))?;

        let envelope: Envelope = serde_json::from_str(&text[sep + 1..])
            .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?;

        let job = self
            .registry
            .job(&envelope.job_name)
            .ok_or_else(|| ConveyorError::UnknownJob(envelope.job_name.clone()))?
            .clone();

        let payload = if envelope.data.is_null() {
            Bytes::new()
        } else {
            Bytes::from(
                serde_json::to_vec(&envelope.data)
                    .map_err(|e| ConveyorError::MalformedEnvelope(e.to_string()))?,
            )
        };

        Ok((job, payload))
    }
}
