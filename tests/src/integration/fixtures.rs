//! Sample events and builders shared by the integration flows.

use std::sync::Arc;
use std::time::Duration;

use domain_bus::{domain_event, SharedEvent, Subscription};
use eventstore_bus::{EventStoreBus, EventStoreBusConfig, HandlerRegistry, SubscriptionDescriptor};
use serde::{Deserialize, Serialize};
use store_client::InMemoryEventStore;

/// Reconnect delay used by every fixture bus.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub id: u64,
    pub sku: String,
}
domain_event!(OrderPlaced);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCaptured {
    pub order_id: u64,
    pub amount_cents: u64,
}
domain_event!(PaymentCaptured);

pub fn order(id: u64) -> OrderPlaced {
    OrderPlaced {
        id,
        sku: format!("SKU-{id}"),
    }
}

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_json::<OrderPlaced>()
        .register_json::<PaymentCaptured>();
    registry
}

pub fn config(descriptors: &[&str]) -> EventStoreBusConfig {
    descriptors
        .iter()
        .map(|text| text.parse::<SubscriptionDescriptor>().unwrap())
        .fold(EventStoreBusConfig::default(), EventStoreBusConfig::with_subscription)
        .with_reconnect_delay(RECONNECT_DELAY)
}

pub fn bus_with(
    store: &InMemoryEventStore,
    config: EventStoreBusConfig,
    registry: HandlerRegistry,
) -> EventStoreBus {
    EventStoreBus::new(Arc::new(store.clone()), config, registry).unwrap()
}

pub fn bus(store: &InMemoryEventStore, descriptors: &[&str]) -> EventStoreBus {
    bus_with(store, config(descriptors), registry())
}

/// Next event on the in-process bus, failing the test after one second.
pub async fn next_event(subscription: &mut Subscription) -> SharedEvent {
    tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("no event within a second")
        .expect("bus closed")
}

/// Let spawned tasks run until idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
