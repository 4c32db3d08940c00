//! # EventStore Bus
//!
//! One client, one in-process bus, and the components between them.
//!
//! ```text
//!                  ┌───────────────────────── EventStoreBus ──────────────────────────┐
//!  store ──────────│─→ SubscriptionSupervisor ─→ EventDispatcher ─→ InProcessEventBus ─│──→ subscribe(filter)
//!    ↑             │                                  │                                │
//!    └─────────────│─── StorePublisher ←── publish()  HandlerRegistry                  │
//!                  └──────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use domain_bus::{DomainEvent, EventFilter, EventStream, InProcessEventBus, SharedEvent, Subscription};
use store_client::{AppendResult, ConnectionSettings, EventStoreClient};
use tracing::{info, Span};

use crate::config::EventStoreBusConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::BusError;
use crate::publisher::StorePublisher;
use crate::registry::HandlerRegistry;
use crate::status::SubscriptionStatus;
use crate::supervisor::SubscriptionSupervisor;

/// Subscription lifecycle manager between a stream store and the in-process bus.
pub struct EventStoreBus {
    registry: Arc<HandlerRegistry>,
    events: Arc<InProcessEventBus>,
    supervisor: SubscriptionSupervisor,
    publisher: StorePublisher,
    span: Span,
}

impl EventStoreBus {
    /// Wire the components around `client`.
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` if `config` does not validate. Nothing touches
    /// the store until [`EventStoreBus::start`].
    pub fn new(
        client: Arc<dyn EventStoreClient>,
        config: EventStoreBusConfig,
        registry: HandlerRegistry,
    ) -> Result<Self, BusError> {
        Self::with_events(client, config, registry, Arc::new(InProcessEventBus::new()))
    }

    /// Validate `settings` before wiring the components around `client`.
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` for bad connection settings or bus configuration.
    pub fn with_connection_settings(
        settings: &ConnectionSettings,
        client: Arc<dyn EventStoreClient>,
        config: EventStoreBusConfig,
        registry: HandlerRegistry,
    ) -> Result<Self, BusError> {
        settings
            .validate()
            .map_err(|e| BusError::Configuration(e.to_string()))?;
        Self::new(client, config, registry)
    }

    /// Push reconstructed events onto an existing in-process bus.
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` if `config` does not validate.
    pub fn with_events(
        client: Arc<dyn EventStoreClient>,
        config: EventStoreBusConfig,
        registry: HandlerRegistry,
        events: Arc<InProcessEventBus>,
    ) -> Result<Self, BusError> {
        let span = tracing::info_span!("eventstore_bus");
        let registry = Arc::new(registry);

        let dispatcher = Arc::new(EventDispatcher::with_span(
            Arc::clone(&registry),
            events.clone(),
            tracing::info_span!(parent: &span, "event_dispatcher"),
        ));
        let supervisor = SubscriptionSupervisor::with_span(
            Arc::clone(&client),
            dispatcher,
            &config,
            tracing::info_span!(parent: &span, "subscription_supervisor"),
        )?;
        let publisher = StorePublisher::with_span(
            client,
            config.default_stream,
            tracing::info_span!(parent: &span, "store_publisher"),
        );

        Ok(Self {
            registry,
            events,
            supervisor,
            publisher,
            span,
        })
    }

    /// Create persistent groups and open every subscription.
    ///
    /// # Errors
    ///
    /// `BusError::PersistentCountMismatch` if a group could not be created (catch-up
    /// subscriptions are still opened), `BusError::AlreadyStarted` on a second call.
    pub async fn start(&self) -> Result<(), BusError> {
        info!(
            parent: &self.span,
            handlers = self.registry.len(),
            "Starting subscriptions"
        );
        self.supervisor.start().await
    }

    /// Append an event to `stream`, or the default stream.
    ///
    /// # Errors
    ///
    /// `BusError::Serialization` or `BusError::Publish`.
    pub async fn publish(
        &self,
        event: &dyn DomainEvent,
        stream: Option<&str>,
    ) -> Result<AppendResult, BusError> {
        self.publisher.publish(event, stream).await
    }

    /// Append several events to one stream.
    ///
    /// # Errors
    ///
    /// `BusError::Serialization` or `BusError::Publish`.
    pub async fn publish_all(
        &self,
        events: &[SharedEvent],
        stream: Option<&str>,
    ) -> Result<AppendResult, BusError> {
        self.publisher.publish_all(events, stream).await
    }

    /// Append events raised by an aggregate or saga, each to its own
    /// `stream_name()` or the default stream.
    ///
    /// # Errors
    ///
    /// The first failure. Events before it stay written.
    pub async fn publish_from_aggregate(&self, events: &[SharedEvent]) -> Result<(), BusError> {
        for event in events {
            self.publisher
                .publish(event.as_ref(), event.stream_name())
                .await?;
        }
        Ok(())
    }

    /// Subscribe to reconstructed events on the in-process bus.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.events.subscribe(filter)
    }

    /// Reconstructed events as a `Stream`.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.events.event_stream(filter)
    }

    /// The in-process bus events are pushed onto.
    #[must_use]
    pub fn events(&self) -> &Arc<InProcessEventBus> {
        &self.events
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn all_catch_up_live(&self) -> bool {
        self.supervisor.all_catch_up_live()
    }

    #[must_use]
    pub fn all_persistent_live(&self) -> bool {
        self.supervisor.all_persistent_live()
    }

    /// Both kinds fully live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.supervisor.is_live()
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<SubscriptionStatus> {
        self.supervisor.statuses()
    }

    /// Stop every subscription. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}

impl std::fmt::Debug for EventStoreBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStoreBus")
            .field("registry", &self.registry)
            .field("supervisor", &self.supervisor)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}
