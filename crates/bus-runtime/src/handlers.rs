//! Sample order events and the logging consumer the runtime starts with.

use domain_bus::{domain_event, Subscription};
use eventstore_bus::HandlerRegistry;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: String,
    pub amount_cents: u64,
}
domain_event!(OrderPlaced);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: String,
    pub carrier: String,
}
domain_event!(OrderShipped);

/// Constructors for the sample events.
#[must_use]
pub fn sample_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_json::<OrderPlaced>()
        .register_json::<OrderShipped>();
    registry
}

/// Log every event the subscription yields until the bus closes.
pub async fn log_events(mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        info!(event_type = event.event_type(), event = ?event, "Domain event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sample_registry_rebuilds_order_placed() {
        let registry = sample_registry();
        assert_eq!(registry.event_types(), vec!["OrderPlaced", "OrderShipped"]);

        let ctor = registry.resolve("OrderPlaced").unwrap();
        let event = ctor(vec![json!("o-1"), json!(1250)]).unwrap();
        assert_eq!(
            event.downcast_ref::<OrderPlaced>(),
            Some(&OrderPlaced {
                order_id: "o-1".into(),
                amount_cents: 1250
            })
        );
    }
}
