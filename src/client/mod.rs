//! Client wiring and consumer-group naming
//!
//! Overview
//! --------
//! The client ties the registry, codec, broker, lock store, producer, and
//! alert sink together, and owns the group-naming rules used consistently
//! on both the publish and consume sides. One broker namespace serves
//! multiple deployment environments by suffixing group names with the
//! configured environment tag everywhere except production.

use crate::alert::{Alerter, AlertSink};
use crate::broker::Broker;
use crate::codec::EnvelopeCodec;
use crate::config::{Config, ConsumerOptions};
use crate::consumer::Consumer;
use crate::errors::ConveyorError;
use crate::producer::Producer;
use crate::registry::JobRegistry;
use crate::store::LockStore;
use std::sync::Arc;

/// Prefix token expected on consumer-group identifiers; bare topic names
/// are normalized by prepending it.
pub const GROUP_PREFIX: &str = "GID";

#[derive(Clone)]
pub struct GroupNaming {
    app_env: String,
    mq_env: String,
    registry: Arc<JobRegistry>,
}

impl GroupNaming {
    pub fn new(app_env: String, mq_env: String, registry: Arc<JobRegistry>) -> Self {
        Self {
            app_env,
            mq_env,
            registry,
        }
    }

    /// Resolve the broker-facing group name for a topic (or an explicit
    /// group identifier). Registered topics resolve through their queue;
    /// anything else is normalized to the group-prefix convention first.
    pub fn group_name_for_topic(&self, topic: &str) -> String {
        match self.registry.queue_for_topic(topic) {
            Some(queue) if !queue.topic().is_empty() => self.qualify_group(queue.group_id()),
            _ if topic.contains(GROUP_PREFIX) => self.qualify_group(topic),
            _ => self.qualify_group(&format!("{GROUP_PREFIX}_{topic}")),
        }
    }

    /// Environment-qualify a raw group id: unchanged in production or when
    /// no environment tag is configured, suffixed with the tag otherwise.
    pub fn qualify_group(&self, group_id: &str) -> String {
        if self.mq_env.is_empty() || self.app_env == "prod" {
            return group_id.to_string();
        }
        format!("{group_id}_{}", self.mq_env)
    }
}

pub struct Client {
    config: Config,
    registry: Arc<JobRegistry>,
    codec: EnvelopeCodec,
    broker: Arc<dyn Broker>,
    store: Arc<dyn LockStore>,
    alerter: Alerter,
    naming: GroupNaming,
    producer: Producer,
}

impl Client {
    pub fn new(
        config: Config,
        registry: JobRegistry,
        broker: Arc<dyn Broker>,
        store: Arc<dyn LockStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let registry = Arc::new(registry);
        let codec = EnvelopeCodec::new(registry.clone());
        let naming = GroupNaming::new(
            config.app_env.clone(),
            config.mq_env.clone(),
            registry.clone(),
        );
        let alerter = Alerter::new(sink, "queue");
        let producer = Producer::new(
            broker.clone(),
            codec.clone(),
            naming.clone(),
            alerter.scoped("queue producer"),
        );
        Self {
            config,
            registry,
            codec,
            broker,
            store,
            alerter,
            naming,
            producer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn group_name_for_topic(&self, topic: &str) -> String {
        self.naming.group_name_for_topic(topic)
    }

    pub fn qualify_group(&self, group_id: &str) -> String {
        self.naming.qualify_group(group_id)
    }

    /// Build a consumer for a registered topic. The engine is started with
    /// [`Consumer::start`]; construction only wires it.
    pub fn consumer(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> Result<Consumer, ConveyorError> {
        let queue = self
            .registry
            .queue_for_topic(topic)
            .ok_or_else(|| ConveyorError::Registry(format!("no queue registered for {topic}")))?;
        Ok(Consumer::new(
            self.broker.clone(),
            self.store.clone(),
            self.codec.clone(),
            self.alerter.scoped("queue consumer"),
            queue.topic().to_string(),
            self.naming.group_name_for_topic(queue.topic()),
            options,
        ))
    }
}
