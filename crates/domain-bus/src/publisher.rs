//! # Producers
//!
//! The [`EventPublisher`] seam and its broadcast-backed implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::events::{EventFilter, SharedEvent};
use crate::subscriber::{EventStream, Subscription};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Where rebuilt domain events are pushed. A slow or absent consumer never
/// holds up the caller.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Push `event`, returning how many receivers were handed it.
    async fn publish(&self, event: SharedEvent) -> usize;

    /// Events pushed since creation, received or not.
    fn events_published(&self) -> u64;
}

/// Append-only in-process sequence on a `broadcast` channel. Lagging
/// receivers lose the oldest events.
pub struct InProcessEventBus {
    sender: broadcast::Sender<SharedEvent>,

    /// Active subscription count by filter key.
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,

    events_published: AtomicU64,

    capacity: usize,
}

impl InProcessEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` events are buffered per receiver.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Pull-style receiver for events `filter` accepts.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        let key = filter.key();
        *self.subscriptions.write().entry(key.clone()).or_insert(0) += 1;

        debug!(
            event_types = ?filter.event_types,
            streams = ?filter.streams,
            "New subscription created"
        );

        Subscription::new(receiver, filter, Arc::clone(&self.subscriptions), key)
    }

    /// Get a `Stream` of events matching a filter.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.sender.subscribe(), filter)
    }

    /// Push an event without awaiting. Returns the receiver count.
    pub fn emit(&self, event: SharedEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        let event_type = event.event_type();

        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(event_type = event_type, receivers = receivers, "Event emitted");
                receivers
            }
            Err(_) => {
                // Nobody listening; the sequence is append-only so the event is just gone
                trace!(event_type = event_type, "Event emitted with no receivers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Tracked subscriptions for an exact filter.
    #[must_use]
    pub fn subscriptions_for(&self, filter: &EventFilter) -> usize {
        self.subscriptions
            .read()
            .get(&filter.key())
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InProcessEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .field("events_published", &self.events_published())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for InProcessEventBus {
    async fn publish(&self, event: SharedEvent) -> usize {
        self.emit(event)
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
