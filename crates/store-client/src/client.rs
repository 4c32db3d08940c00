//! # Store Client Facade
//!
//! The capability the subscription manager consumes. Any stream store
//! (gRPC client, embedded store, test double) plugs in by implementing
//! [`EventStoreClient`].

use async_trait::async_trait;

use crate::error::StoreError;
use crate::subscription::{PersistentSubscription, StreamSubscription};
use crate::types::{AppendResult, EventData, PersistentSubscriptionSettings, ReadRevision};

/// Outbound port to the stream store.
#[async_trait]
pub trait EventStoreClient: Send + Sync {
    /// Append events to a stream, creating the stream if needed.
    ///
    /// # Errors
    ///
    /// Any backend failure. Appends are not retried by the client.
    async fn append_to_stream(
        &self,
        stream: &str,
        events: Vec<EventData>,
    ) -> Result<AppendResult, StoreError>;

    /// Create a persistent subscription group on a stream.
    ///
    /// # Errors
    ///
    /// `StoreError::PersistentSubscriptionExists` if the group already exists,
    /// any other variant for genuine failures.
    async fn create_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        settings: &PersistentSubscriptionSettings,
    ) -> Result<(), StoreError>;

    /// Subscribe to a stream starting at `from`, continuing live.
    async fn subscribe_to_stream(
        &self,
        stream: &str,
        from: ReadRevision,
    ) -> Result<StreamSubscription, StoreError>;

    /// Connect to an existing persistent subscription group.
    async fn subscribe_to_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<PersistentSubscription, StoreError>;

    /// Catch-up subscription replaying the stream from its beginning.
    async fn subscribe_catch_up(&self, stream: &str) -> Result<StreamSubscription, StoreError> {
        self.subscribe_to_stream(stream, ReadRevision::Start).await
    }

    /// Volatile subscription receiving only events appended from now on.
    async fn subscribe_volatile(&self, stream: &str) -> Result<StreamSubscription, StoreError> {
        self.subscribe_to_stream(stream, ReadRevision::End).await
    }
}
