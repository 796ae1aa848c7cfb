use std::sync::Arc;

use async_trait::async_trait;

use conveyor::client::GroupNaming;
use conveyor::errors::BoxError;
use conveyor::registry::{Job, JobQueue, JobRegistry};

struct OrderJob;

#[async_trait]
impl Job for OrderJob {
    fn name(&self) -> &str {
        "OrderJob"
    }

    async fn execute(&self, _payload: &[u8]) -> Result<(), BoxError> {
        Ok(())
    }
}

struct OrderQueue;

impl JobQueue for OrderQueue {
    fn topic(&self) -> &str {
        "Order"
    }

    fn group_id(&self) -> &str {
        "GID_Order"
    }

    fn jobs(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::new(OrderJob)]
    }
}

fn registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(OrderQueue)).unwrap();
    Arc::new(registry)
}

fn naming(app_env: &str, mq_env: &str) -> GroupNaming {
    GroupNaming::new(app_env.to_string(), mq_env.to_string(), registry())
}

#[test]
fn group_is_suffixed_outside_production() {
    let naming = naming("staging", "dev38");
    assert_eq!(naming.qualify_group("GID_Order"), "GID_Order_dev38");
}

#[test]
fn group_is_unchanged_in_production() {
    let naming = naming("prod", "dev38");
    assert_eq!(naming.qualify_group("GID_Order"), "GID_Order");
}

#[test]
fn group_is_unchanged_without_env_tag() {
    let naming = naming("staging", "");
    assert_eq!(naming.qualify_group("GID_Order"), "GID_Order");
}

#[test]
fn registered_topic_resolves_through_its_queue() {
    let naming = naming("staging", "dev38");
    assert_eq!(naming.group_name_for_topic("Order"), "GID_Order_dev38");
}

#[test]
fn explicit_group_id_passes_through_qualification() {
    let naming = naming("staging", "dev38");
    assert_eq!(
        naming.group_name_for_topic("GID_external"),
        "GID_external_dev38"
    );
}

#[test]
fn bare_topic_is_normalized_with_group_prefix() {
    let staging = naming("staging", "dev38");
    assert_eq!(staging.group_name_for_topic("billing"), "GID_billing_dev38");

    let prod = naming("prod", "dev38");
    assert_eq!(prod.group_name_for_topic("billing"), "GID_billing");
}
