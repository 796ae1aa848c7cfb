use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use conveyor::codec::{EnvelopeCodec, ENVELOPE_MARK};
use conveyor::errors::{BoxError, ConveyorError};
use conveyor::registry::{Job, JobQueue, JobRegistry};

struct ShopJob;

#[async_trait]
impl Job for ShopJob {
    fn name(&self) -> &str {
        "ShopJob"
    }

    async fn execute(&self, _payload: &[u8]) -> Result<(), BoxError> {
        Ok(())
    }
}

struct ShopQueue;

impl JobQueue for ShopQueue {
    fn topic(&self) -> &str {
        "shop"
    }

    fn group_id(&self) -> &str {
        "GID_shop"
    }

    fn jobs(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::new(ShopJob)]
    }
}

struct OrphanJob;

#[async_trait]
impl Job for OrphanJob {
    fn name(&self) -> &str {
        "OrphanJob"
    }

    async fn execute(&self, _payload: &[u8]) -> Result<(), BoxError> {
        Ok(())
    }
}

fn codec() -> EnvelopeCodec {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(ShopQueue)).unwrap();
    EnvelopeCodec::new(Arc::new(registry))
}

#[test]
fn encode_targets_registered_topic_and_marks_body() {
    let codec = codec();
    let (topic, body) = codec.encode(&ShopJob, &json!({ "id": 7 })).unwrap();
    assert_eq!(topic, "shop");
    assert!(body.starts_with(&format!("{ENVELOPE_MARK}|")));
    assert!(codec.is_routed(body.as_bytes()));
}

#[test]
fn roundtrip_preserves_payload() {
    let codec = codec();
    let payload = json!({ "id": 7, "items": ["a", "b"], "total": 12.5 });
    let (_, body) = codec.encode(&ShopJob, &payload).unwrap();

    let (job, decoded) = codec.decode(body.as_bytes()).unwrap();
    assert_eq!(job.name(), "ShopJob");
    let decoded: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
    assert_eq!(decoded, payload);
}

#[test]
fn roundtrip_with_null_payload_yields_empty_bytes() {
    let codec = codec();
    let (_, body) = codec.encode(&ShopJob, &json!(null)).unwrap();
    let (_, decoded) = codec.decode(body.as_bytes()).unwrap();
    assert!(decoded.is_empty());
}

#[test]
fn encode_fails_without_registered_queue() {
    let codec = codec();
    let err = codec.encode(&OrphanJob, &json!(1)).unwrap_err();
    assert!(matches!(err, ConveyorError::UnregisteredQueue(name) if name == "OrphanJob"));
}

#[test]
fn plain_bodies_are_not_routed() {
    let codec = codec();
    assert!(!codec.is_routed(b"{\"plain\":true}"));
    assert!(!codec.is_routed(b""));
    assert!(!codec.is_routed(ENVELOPE_MARK.as_bytes()));
    // Marker must be a prefix, not merely present somewhere in the body.
    assert!(!codec.is_routed(b"prefix queueJob|{}"));
}

#[test]
fn decode_rejects_unknown_job() {
    let codec = codec();
    let body = format!(
        "{ENVELOPE_MARK}|{}",
        json!({ "topic": "shop", "groupId": "GID_shop", "jobName": "GhostJob", "data": 1 })
    );
    let err = codec.decode(body.as_bytes()).unwrap_err();
    assert!(matches!(err, ConveyorError::UnknownJob(name) if name == "GhostJob"));
}

#[test]
fn decode_rejects_malformed_envelope() {
    let codec = codec();
    let err = codec
        .decode(format!("{ENVELOPE_MARK}|not json").as_bytes())
        .unwrap_err();
    assert!(matches!(err, ConveyorError::MalformedEnvelope(_)));

    let err = codec.decode(b"").unwrap_err();
    assert!(matches!(err, ConveyorError::MalformedEnvelope(_)));
}
