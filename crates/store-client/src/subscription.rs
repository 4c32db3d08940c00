//! # Subscription Handles
//!
//! Backend-neutral handles returned by the subscribe calls. A backend feeds
//! an unbounded channel of [`SubscriptionMessage`]s; dropping the sending side
//! is how a backend signals that the connection closed.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{NackAction, ResolvedEvent};

/// One item produced by a live subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// A delivered event.
    Event(ResolvedEvent),
    /// A catch-up subscription finished replaying history and is now live.
    CaughtUp,
    /// The connection failed. The subscription is unusable afterwards.
    Error(StoreError),
}

/// Clonable stop signal for a subscription.
///
/// Signalling is idempotent. Once signalled the owning handle's `next()`
/// yields `None`, and backends holding [`Unsubscriber::watch`] stop feeding it.
#[derive(Debug, Clone)]
pub struct Unsubscriber {
    sender: Arc<watch::Sender<bool>>,
}

impl Unsubscriber {
    /// Create a fresh, unsignalled stop signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal the subscription to stop.
    pub fn unsubscribe(&self) {
        self.sender.send_replace(true);
    }

    /// Whether the stop signal has been raised.
    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiver side for backends that need to observe the stop signal.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for Unsubscriber {
    fn default() -> Self {
        Self::new()
    }
}

/// Catch-up or volatile subscription to a single stream.
#[derive(Debug)]
pub struct StreamSubscription {
    id: Uuid,
    stream: String,
    receiver: mpsc::UnboundedReceiver<SubscriptionMessage>,
    stop: watch::Receiver<bool>,
    unsubscriber: Unsubscriber,
}

impl StreamSubscription {
    /// Wrap a backend channel.
    ///
    /// The backend keeps `unsubscriber` (or its [`Unsubscriber::watch`]) to
    /// learn when the consumer unsubscribes.
    #[must_use]
    pub fn new(
        stream: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<SubscriptionMessage>,
        unsubscriber: Unsubscriber,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream: stream.into(),
            receiver,
            stop: unsubscriber.watch(),
            unsubscriber,
        }
    }

    /// Subscription id, unique per subscribe call.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stream this subscription reads.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next message from the backend
    /// - `None` - The connection closed or the subscription was unsubscribed
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        if *self.stop.borrow() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.stop.changed() => None,
            message = self.receiver.recv() => message,
        }
    }

    /// Handle that can stop this subscription from another task.
    #[must_use]
    pub fn unsubscriber(&self) -> Unsubscriber {
        self.unsubscriber.clone()
    }

    /// Stop this subscription.
    pub fn unsubscribe(&self) {
        self.unsubscriber.unsubscribe();
    }
}

/// Acknowledgement sent back to the backend by a persistent subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckCommand {
    Ack {
        event_id: Uuid,
    },
    Nack {
        action: NackAction,
        reason: String,
        event_id: Uuid,
    },
}

/// Subscription to a server-tracked persistent subscription group.
#[derive(Debug)]
pub struct PersistentSubscription {
    inner: StreamSubscription,
    group: String,
    acks: mpsc::UnboundedSender<AckCommand>,
}

impl PersistentSubscription {
    /// Wrap a backend channel together with the backend's ack channel.
    #[must_use]
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<SubscriptionMessage>,
        acks: mpsc::UnboundedSender<AckCommand>,
        unsubscriber: Unsubscriber,
    ) -> Self {
        Self {
            inner: StreamSubscription::new(stream, receiver, unsubscriber),
            group: group.into(),
            acks,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id()
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        self.inner.stream()
    }

    /// Persistent subscription group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Receive the next message. See [`StreamSubscription::next`].
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        self.inner.next().await
    }

    /// Positively acknowledge a delivered event.
    ///
    /// # Errors
    ///
    /// `StoreError::Closed` if the backend no longer accepts acknowledgements.
    pub fn ack(&self, event_id: Uuid) -> Result<(), StoreError> {
        self.acks
            .send(AckCommand::Ack { event_id })
            .map_err(|_| StoreError::Closed)
    }

    /// Negatively acknowledge a delivered event.
    ///
    /// # Errors
    ///
    /// `StoreError::Closed` if the backend no longer accepts acknowledgements.
    pub fn nack(
        &self,
        action: NackAction,
        reason: impl Into<String>,
        event_id: Uuid,
    ) -> Result<(), StoreError> {
        self.acks
            .send(AckCommand::Nack {
                action,
                reason: reason.into(),
                event_id,
            })
            .map_err(|_| StoreError::Closed)
    }

    #[must_use]
    pub fn unsubscriber(&self) -> Unsubscriber {
        self.inner.unsubscriber()
    }

    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }
}
