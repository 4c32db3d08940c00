//! # Bus Runtime
//!
//! Runs an [`EventStoreBus`] with its background consumers until told to stop.
//!
//! ## Startup Sequence
//!
//! 1. Start the bus (persistent gate, then catch-up and persistent subscriptions)
//! 2. Spawn the event logger on the in-process bus
//! 3. Spawn the liveness reporter
//!
//! A persistent count mismatch stops startup. Every other failure is recovered
//! by the bus itself.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod handlers;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use domain_bus::EventFilter;
use eventstore_bus::EventStoreBus;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Runtime settings beyond the bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// How often subscription liveness is logged.
    pub status_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Reads `ES_RUNTIME_STATUS_INTERVAL_SECS` (default: 30).
    ///
    /// # Errors
    ///
    /// The value is present but not a number.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = env::var("ES_RUNTIME_STATUS_INTERVAL_SECS") {
            let secs = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("ES_RUNTIME_STATUS_INTERVAL_SECS is not a number: {value}"))?;
            config.status_interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }
}

/// The bus plus its background tasks.
pub struct BusRuntime {
    bus: Arc<EventStoreBus>,
    config: RuntimeConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BusRuntime {
    #[must_use]
    pub fn new(bus: EventStoreBus, config: RuntimeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bus: Arc::new(bus),
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Start the bus and the background tasks.
    ///
    /// # Errors
    ///
    /// The bus could not start (persistent count mismatch, second start).
    pub async fn start(&self) -> Result<()> {
        info!("===========================================");
        info!("  EventStore Bus Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        // Subscribe before starting so replayed events are not missed
        let subscription = self.bus.subscribe(EventFilter::all());
        let mut logger_shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = handlers::log_events(subscription) => {}
                _ = logger_shutdown.changed() => {
                    debug!("Event logger stopped");
                }
            }
        });

        self.bus
            .start()
            .await
            .context("Event store bus failed to start")?;

        let bus = Arc::clone(&self.bus);
        let interval = self.config.status_interval;
        let mut status_shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => report_liveness(&bus),
                    _ = status_shutdown.changed() => break,
                }
            }
        });

        info!(
            catch_up_live = self.bus.all_catch_up_live(),
            persistent_live = self.bus.all_persistent_live(),
            "Bus runtime started"
        );
        Ok(())
    }

    /// Stop background tasks and every subscription.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        self.bus.shutdown().await;

        match es_telemetry::encode_metrics() {
            Ok(metrics) => debug!(metrics = %metrics, "Final metrics"),
            Err(e) => warn!(error = %e, "Could not encode metrics"),
        }
        info!("Shutdown complete");
    }

    #[must_use]
    pub fn bus(&self) -> Arc<EventStoreBus> {
        Arc::clone(&self.bus)
    }
}

fn report_liveness(bus: &EventStoreBus) {
    if bus.is_live() {
        debug!("All subscriptions live");
        return;
    }
    for status in bus.statuses().into_iter().filter(|s| !s.is_live) {
        warn!(
            subscription = %status.descriptor,
            state = %status.state,
            reconnect_attempts = status.reconnect_attempts,
            last_error = status.last_error.as_deref().unwrap_or_default(),
            "Subscription not live"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstore_bus::{EventStoreBusConfig, SubscriptionDescriptor};
    use store_client::{InMemoryEventStore, StoreError};

    fn runtime(store: &InMemoryEventStore, config: EventStoreBusConfig) -> BusRuntime {
        let bus = EventStoreBus::new(
            Arc::new(store.clone()),
            config,
            handlers::sample_registry(),
        )
        .unwrap();
        BusRuntime::new(bus, RuntimeConfig::default())
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let store = InMemoryEventStore::new();
        let runtime = runtime(
            &store,
            EventStoreBusConfig::default()
                .with_subscription(SubscriptionDescriptor::catch_up("orders"))
                .with_subscription(SubscriptionDescriptor::persistent("orders", "runtime")),
        );

        runtime.start().await.unwrap();
        assert!(runtime.bus().is_live());

        runtime.shutdown().await;
        assert!(!runtime.bus().is_live());
        assert_eq!(store.open_subscriptions("orders"), 0);
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_start() {
        let store = InMemoryEventStore::new();
        store.fail_persistent_creation("orders", "runtime", StoreError::Connection("down".into()));
        let runtime = runtime(
            &store,
            EventStoreBusConfig::default()
                .with_subscription(SubscriptionDescriptor::persistent("orders", "runtime")),
        );

        let err = runtime.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("0 != 1"));
        runtime.shutdown().await;
    }

    #[test]
    fn test_default_status_interval() {
        assert_eq!(RuntimeConfig::default().status_interval, Duration::from_secs(30));
    }
}
