//! # Event Dispatcher
//!
//! Classifies each delivery from the store and, when a constructor is
//! registered for its type, pushes the rebuilt event onto the in-process bus.
//!
//! ## Classification
//!
//! | Delivery | Outcome |
//! |----------|---------|
//! | No event, or not JSON | `Undeliverable` (registry never consulted) |
//! | No constructor for the type | `Unhandled` |
//! | Constructor succeeded | `Delivered` |
//! | Bad JSON, constructor error or panic | `Err(DispatchError)` |

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use domain_bus::{EventPublisher, SharedEvent};
use serde_json::Value;
use store_client::ResolvedEvent;
use tracing::{error, trace, warn, Span};

use crate::error::DispatchError;
use crate::registry::HandlerRegistry;

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Rebuilt and pushed onto the in-process bus.
    Delivered,
    /// Missing or non-JSON payload. Dropped.
    Undeliverable,
    /// No constructor registered for the type. Dropped.
    Unhandled,
}

impl DispatchOutcome {
    /// Label used in metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Undeliverable => "undeliverable",
            Self::Unhandled => "unhandled",
        }
    }
}

enum Reconstructed {
    Event(SharedEvent),
    Undeliverable,
    Unhandled,
}

/// Turns store deliveries into in-process domain events.
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    bus: Arc<dyn EventPublisher>,
    span: Span,
}

impl EventDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, bus: Arc<dyn EventPublisher>) -> Self {
        Self::with_span(
            registry,
            bus,
            tracing::info_span!("event_dispatcher"),
        )
    }

    /// Use `span` as the logging context for every dispatch.
    pub fn with_span(
        registry: Arc<HandlerRegistry>,
        bus: Arc<dyn EventPublisher>,
        span: Span,
    ) -> Self {
        Self {
            registry,
            bus,
            span,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Classify a delivery and forward it when a constructor matches.
    ///
    /// The push onto the bus never waits for consumers.
    ///
    /// # Errors
    ///
    /// [`DispatchError`] when the payload or constructor fails; the caller
    /// decides between nack and drop.
    pub async fn dispatch(&self, resolved: &ResolvedEvent) -> Result<DispatchOutcome, DispatchError> {
        match self.span.in_scope(|| self.reconstruct(resolved))? {
            Reconstructed::Event(event) => {
                self.bus.publish(event).await;
                Ok(DispatchOutcome::Delivered)
            }
            Reconstructed::Undeliverable => Ok(DispatchOutcome::Undeliverable),
            Reconstructed::Unhandled => Ok(DispatchOutcome::Unhandled),
        }
    }

    fn reconstruct(&self, resolved: &ResolvedEvent) -> Result<Reconstructed, DispatchError> {
        let event = match &resolved.event {
            Some(event) if event.is_json => event,
            Some(event) => {
                error!(
                    event_id = %event.id,
                    stream = %event.stream_id,
                    event_type = %event.event_type,
                    "Received event that could not be resolved: payload is not JSON"
                );
                return Ok(Reconstructed::Undeliverable);
            }
            None => {
                error!(
                    event_id = ?resolved.original_id(),
                    stream = ?resolved.original_stream_id(),
                    "Received event that could not be resolved: event missing"
                );
                return Ok(Reconstructed::Undeliverable);
            }
        };

        let Some(constructor) = self.registry.resolve(&event.event_type) else {
            warn!(
                event_id = %event.id,
                stream = %event.stream_id,
                event_type = %event.event_type,
                "Received event that could not be handled"
            );
            return Ok(Reconstructed::Unhandled);
        };

        let payload: Value =
            serde_json::from_slice(&event.data).map_err(|e| DispatchError::Payload {
                event_type: event.event_type.clone(),
                reason: e.to_string(),
            })?;

        let fields = positional_fields(payload);

        let rebuilt = catch_unwind(AssertUnwindSafe(|| constructor(fields))).map_err(|panic| {
            DispatchError::HandlerPanicked {
                event_type: event.event_type.clone(),
                message: panic_message(panic.as_ref()),
            }
        })??;

        trace!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Event reconstructed"
        );
        Ok(Reconstructed::Event(rebuilt))
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Object values in insertion order; anything else as a single field.
fn positional_fields(payload: Value) -> Vec<Value> {
    match payload {
        Value::Object(map) => map.into_iter().map(|(_, value)| value).collect(),
        other => vec![other],
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
