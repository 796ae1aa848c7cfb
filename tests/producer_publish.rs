use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use conveyor::alert::{Alerter, AlertSink};
use conveyor::broker::{AckEntry, AckOutcome, Broker, InboundMessage, PublishRequest, PROP_GROUP_ID};
use conveyor::client::GroupNaming;
use conveyor::codec::EnvelopeCodec;
use conveyor::errors::{BoxError, ConveyorError};
use conveyor::producer::Producer;
use conveyor::registry::{Job, JobQueue, JobRegistry};
use conveyor::util::time::now_unix_millis;

/// ---- Fakes -----

#[derive(Default)]
struct FakeAlert {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl AlertSink for FakeAlert {
    async fn notify(&self, message: &str) -> Result<(), BoxError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

impl FakeAlert {
    fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains(needle))
    }
}

#[derive(Default)]
struct RecordingBroker {
    publishes: Mutex<Vec<PublishRequest>>,
    fail_publish: bool,
}

impl RecordingBroker {
    fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    fn last_publish(&self) -> PublishRequest {
        self.publishes.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn pull(
        &self,
        _topic: &str,
        _group: &str,
        _batch: usize,
        _wait: Duration,
    ) -> Result<Vec<InboundMessage>, ConveyorError> {
        Ok(Vec::new())
    }

    async fn ack(
        &self,
        _topic: &str,
        _group: &str,
        _entries: &[AckEntry],
    ) -> Result<AckOutcome, ConveyorError> {
        Ok(AckOutcome::default())
    }

    async fn publish(&self, request: PublishRequest) -> Result<String, ConveyorError> {
        if self.fail_publish {
            return Err(ConveyorError::Broker("endpoint unreachable".into()));
        }
        self.publishes.lock().unwrap().push(request);
        Ok("pub-1".to_string())
    }
}

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

fn producer(broker: Arc<RecordingBroker>, alert: Arc<FakeAlert>) -> Producer {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(ShopQueue)).unwrap();
    let registry = Arc::new(registry);
    Producer::new(
        broker,
        EnvelopeCodec::new(registry.clone()),
        GroupNaming::new("staging".into(), "dev38".into(), registry),
        Alerter::new(alert, "queue producer"),
    )
}

/// ---- Tests -----

#[tokio::test]
async fn job_publish_targets_queue_topic_with_qualified_group() {
    let broker = Arc::new(RecordingBroker::default());
    let alert = Arc::new(FakeAlert::default());
    let p = producer(broker.clone(), alert);

    let id = p.publish_job(&ShopJob, &json!({ "id": 7 })).await.unwrap();
    assert_eq!(id, "pub-1");

    let request = broker.last_publish();
    assert_eq!(request.topic, "shop");
    assert_eq!(request.message_key, "shop");
    assert_eq!(
        request.properties.get(PROP_GROUP_ID).map(String::as_str),
        Some("GID_shop_dev38")
    );
    assert!(request.body.starts_with("queueJob|"));
    assert!(request.start_deliver_time_ms.is_none());
}

#[tokio::test]
async fn delayed_job_publish_stamps_future_delivery() {
    let broker = Arc::new(RecordingBroker::default());
    let alert = Arc::new(FakeAlert::default());
    let p = producer(broker.clone(), alert);

    p.publish_job_delayed(&ShopJob, &json!(1), Duration::from_secs(60))
        .await
        .unwrap();

    let deliver_at = broker.last_publish().start_deliver_time_ms.unwrap();
    assert!(deliver_at >= now_unix_millis() + 55_000);
}

#[tokio::test]
async fn raw_publish_defaults_group_to_topic() {
    let broker = Arc::new(RecordingBroker::default());
    let alert = Arc::new(FakeAlert::default());
    let p = producer(broker.clone(), alert);

    p.publish("billing", "", &json!({ "amount": 3 })).await.unwrap();

    let request = broker.last_publish();
    assert_eq!(request.topic, "billing");
    assert_eq!(
        request.properties.get(PROP_GROUP_ID).map(String::as_str),
        Some("GID_billing_dev38")
    );
    // Raw bodies carry no routing marker.
    assert_eq!(request.body, "{\"amount\":3}");
}

#[tokio::test]
async fn raw_publish_honors_explicit_group() {
    let broker = Arc::new(RecordingBroker::default());
    let alert = Arc::new(FakeAlert::default());
    let p = producer(broker.clone(), alert);

    p.publish_delayed("billing", "GID_audit", &json!(1), Duration::from_secs(5))
        .await
        .unwrap();

    let request = broker.last_publish();
    assert_eq!(
        request.properties.get(PROP_GROUP_ID).map(String::as_str),
        Some("GID_audit_dev38")
    );
    assert!(request.start_deliver_time_ms.is_some());
}

#[tokio::test]
async fn publish_failure_is_alerted_and_returned() {
    let broker = Arc::new(RecordingBroker::failing());
    let alert = Arc::new(FakeAlert::default());
    let p = producer(broker, alert.clone());

    let err = p.publish_job(&ShopJob, &json!(1)).await.unwrap_err();
    assert!(matches!(err, ConveyorError::Broker(_)));
    assert!(alert.contains("publish to topic shop failed"));
}

#[tokio::test]
async fn publish_fails_for_unregistered_job() {
    struct GhostJob;

    #[async_trait]
    impl Job for GhostJob {
        fn name(&self) -> &str {
            "GhostJob"
        }

        async fn execute(&self, _payload: &[u8]) -> Result<(), BoxError> {
            Ok(())
        }
    }

    let broker = Arc::new(RecordingBroker::default());
    let alert = Arc::new(FakeAlert::default());
    let p = producer(broker, alert);

    let err = p.publish_job(&GhostJob, &json!(1)).await.unwrap_err();
    assert!(matches!(err, ConveyorError::UnregisteredQueue(_)));
}
