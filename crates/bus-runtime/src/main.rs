//! # EventStore Bus Runtime
//!
//! Starts the bus against an in-process store seeded with sample order events.
//!
//! ## Environment
//!
//! - `ES_BUS_SUBSCRIPTIONS` and the other `ES_BUS_*` variables configure the bus
//! - `ES_LOG_LEVEL`, `ES_JSON_LOGS` configure logging
//! - `ES_RUNTIME_STATUS_INTERVAL_SECS` sets how often liveness is logged
//!
//! With no subscriptions configured, `catch-up:orders` and
//! `persistent:orders/bus-runtime` are used.

use std::sync::Arc;

use anyhow::{Context, Result};
use bus_runtime::handlers::{sample_registry, OrderPlaced, OrderShipped};
use bus_runtime::{BusRuntime, RuntimeConfig};
use domain_bus::SharedEvent;
use es_telemetry::{init_telemetry, TelemetryConfig};
use eventstore_bus::{EventStoreBus, EventStoreBusConfig, SubscriptionDescriptor};
use store_client::InMemoryEventStore;
use tracing::info;

fn load_bus_config() -> Result<EventStoreBusConfig> {
    let mut config = EventStoreBusConfig::from_env().context("Invalid bus configuration")?;
    if config.subscriptions.is_empty() {
        config = config
            .with_subscription(SubscriptionDescriptor::catch_up("orders"))
            .with_subscription(SubscriptionDescriptor::persistent("orders", "bus-runtime"));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env())?;

    let bus_config = load_bus_config()?;
    let runtime_config = RuntimeConfig::from_env()?;

    let store = InMemoryEventStore::new();
    let bus = EventStoreBus::new(Arc::new(store), bus_config, sample_registry())?;
    let runtime = BusRuntime::new(bus, runtime_config);
    runtime.start().await?;

    let seed: Vec<SharedEvent> = vec![
        Arc::new(OrderPlaced {
            order_id: "order-1".into(),
            amount_cents: 4200,
        }),
        Arc::new(OrderShipped {
            order_id: "order-1".into(),
            carrier: "post".into(),
        }),
    ];
    runtime
        .bus()
        .publish_all(&seed, Some("orders"))
        .await
        .context("Could not publish sample events")?;

    info!("Bus is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
