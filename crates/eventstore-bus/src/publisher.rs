//! # Store Publisher
//!
//! Writes domain events to the store. Each event gets a fresh id and its own
//! type tag. Failures are logged and returned; nothing is retried here.

use std::sync::Arc;

use domain_bus::{DomainEvent, SharedEvent};
use es_telemetry::{EVENTS_PUBLISHED, PUBLISH_FAILURES};
use store_client::{AppendResult, EventData, EventStoreClient};
use tracing::{debug, error, Span};

use crate::error::BusError;

/// Appends domain events to store streams.
pub struct StorePublisher {
    client: Arc<dyn EventStoreClient>,
    default_stream: String,
    span: Span,
}

impl StorePublisher {
    pub fn new(client: Arc<dyn EventStoreClient>, default_stream: impl Into<String>) -> Self {
        Self::with_span(client, default_stream, tracing::info_span!("store_publisher"))
    }

    pub fn with_span(
        client: Arc<dyn EventStoreClient>,
        default_stream: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            client,
            default_stream: default_stream.into(),
            span,
        }
    }

    /// Stream used when the caller names none.
    #[must_use]
    pub fn default_stream(&self) -> &str {
        &self.default_stream
    }

    /// Append one event to `stream`, or the default stream.
    ///
    /// # Errors
    ///
    /// - `BusError::Serialization` - the payload could not be encoded
    /// - `BusError::Publish` - the append failed
    pub async fn publish(
        &self,
        event: &dyn DomainEvent,
        stream: Option<&str>,
    ) -> Result<AppendResult, BusError> {
        let stream = stream.unwrap_or(&self.default_stream);
        let data = self.encode(event)?;
        self.append(stream, vec![data]).await
    }

    /// Append several events to one stream in a single call.
    ///
    /// # Errors
    ///
    /// As [`StorePublisher::publish`]. Nothing is written if any event fails to encode.
    pub async fn publish_all(
        &self,
        events: &[SharedEvent],
        stream: Option<&str>,
    ) -> Result<AppendResult, BusError> {
        let stream = stream.unwrap_or(&self.default_stream);
        let data = events
            .iter()
            .map(|event| self.encode(event.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.append(stream, data).await
    }

    fn encode(&self, event: &dyn DomainEvent) -> Result<EventData, BusError> {
        let serialization = |e: serde_json::Error| {
            error!(
                parent: &self.span,
                event_type = event.event_type(),
                error = %e,
                "Could not serialize event"
            );
            BusError::Serialization {
                event_type: event.event_type().to_string(),
                reason: e.to_string(),
            }
        };

        let payload = event.payload().map_err(serialization)?;
        EventData::json(event.event_type(), &payload).map_err(serialization)
    }

    async fn append(&self, stream: &str, events: Vec<EventData>) -> Result<AppendResult, BusError> {
        let count = events.len() as u64;
        match self.client.append_to_stream(stream, events).await {
            Ok(result) => {
                EVENTS_PUBLISHED.inc_by(count);
                debug!(
                    parent: &self.span,
                    stream = stream,
                    count = count,
                    next_revision = result.next_expected_revision,
                    "Events published"
                );
                Ok(result)
            }
            Err(source) => {
                PUBLISH_FAILURES.inc();
                error!(parent: &self.span, stream = stream, error = %source, "Publish failed");
                Err(BusError::Publish {
                    stream: stream.to_string(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for StorePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePublisher")
            .field("default_stream", &self.default_stream)
            .finish_non_exhaustive()
    }
}
