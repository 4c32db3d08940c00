//! # Consumers
//!
//! Pull-style [`Subscription`] and push-style [`EventStream`], both filtered.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

use crate::events::{EventFilter, SharedEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("In-process bus closed")]
    Closed,
}

/// Filtered receiver on the in-process bus. Counted by the bus while alive.
pub struct Subscription {
    receiver: broadcast::Receiver<SharedEvent>,
    filter: EventFilter,
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,
    key: String,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<SharedEvent>,
        filter: EventFilter,
        subscriptions: Arc<RwLock<HashMap<String, usize>>>,
        key: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            subscriptions,
            key,
        }
    }

    /// Wait for the next event the filter accepts.
    ///
    /// Lagging skips the lost events. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SharedEvent> {
        use broadcast::error::RecvError;

        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(event.as_ref()) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(filter = %self.key, skipped = skipped, "Subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Like [`Subscription::recv`] without waiting: `Ok(None)` when nothing
    /// accepted is queued.
    ///
    /// # Errors
    ///
    /// `SubscriptionError::Closed` once the bus is gone.
    pub fn try_recv(&mut self) -> Result<Option<SharedEvent>, SubscriptionError> {
        use broadcast::error::TryRecvError;

        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(event.as_ref()) => return Ok(Some(event)),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subs = self.subscriptions.write();
        if let Some(count) = subs.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subs.remove(&self.key);
            }
        }
        debug!(filter = %self.key, "Subscription dropped");
    }
}

/// A filtered `Stream` over the bus.
pub struct EventStream {
    inner: BroadcastStream<SharedEvent>,
    filter: EventFilter,
}

impl EventStream {
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<SharedEvent>, filter: EventFilter) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            filter,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Stream for EventStream {
    type Item = SharedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.filter.matches(event.as_ref()) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
                    debug!(lagged = count, "Event stream lagged, some events dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DomainEvent;
    use crate::publisher::{EventPublisher, InProcessEventBus};
    use futures::StreamExt;
    use serde::Serialize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Serialize)]
    struct OrderPlaced {
        id: u64,
    }
    crate::domain_event!(OrderPlaced);

    #[derive(Debug, Serialize)]
    struct OrderShipped {
        id: u64,
    }
    crate::domain_event!(OrderShipped);

    #[tokio::test]
    async fn test_recv_downcasts_to_concrete_event() {
        let bus = InProcessEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(Arc::new(OrderPlaced { id: 1 })).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.downcast_ref::<OrderPlaced>().map(|e| e.id), Some(1));
    }

    #[tokio::test]
    async fn test_recv_skips_filtered_types() {
        let bus = InProcessEventBus::new();
        let mut sub = bus.subscribe(EventFilter::event_types(["OrderShipped"]));

        bus.publish(Arc::new(OrderPlaced { id: 1 })).await;
        bus.publish(Arc::new(OrderShipped { id: 2 })).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type(), "OrderShipped");
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = InProcessEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        assert!(matches!(sub.try_recv(), Ok(None)));

        bus.emit(Arc::new(OrderPlaced { id: 1 }));
        assert!(matches!(sub.try_recv(), Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_recv_after_bus_dropped() {
        let bus = InProcessEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        drop(bus);

        assert!(sub.recv().await.is_none());
        assert!(matches!(sub.try_recv(), Err(SubscriptionError::Closed)));
    }

    #[tokio::test]
    async fn test_event_stream_filters() {
        let bus = InProcessEventBus::new();
        let mut stream = bus.event_stream(EventFilter::event_types(["OrderPlaced"]));

        bus.emit(Arc::new(OrderShipped { id: 1 }));
        bus.emit(Arc::new(OrderPlaced { id: 2 }));

        let received = timeout(Duration::from_millis(100), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.downcast_ref::<OrderPlaced>().map(|e| e.id), Some(2));
        assert_eq!(EventStream::filter(&stream).event_types, vec!["OrderPlaced".to_string()]);
    }
}
