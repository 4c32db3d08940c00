//! # Store Client - Stream Store Capability Boundary
//!
//! Everything the subscription manager needs from an event stream store,
//! expressed as the [`EventStoreClient`] trait plus the values it exchanges.
//!
//! ## Operations
//!
//! - **Append:** write proposed events to a named stream
//! - **Create:** create a persistent subscription group (`PersistentSubscriptionExists` when present)
//! - **Subscribe:** catch-up, volatile or persistent
//! - **Ack/Nack:** settle persistent deliveries by original event id
//!
//! ## Backends
//!
//! [`InMemoryEventStore`] is a full backend held in process memory, with
//! fault injection for connection drops and creation failures.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod error;
pub mod memory;
pub mod settings;
pub mod subscription;
pub mod types;

pub use client::EventStoreClient;
pub use error::StoreError;
pub use memory::{InMemoryEventStore, NackRecord};
pub use settings::{ConnectionSettings, Credentials, Endpoint, NodePreference};
pub use subscription::{
    AckCommand, PersistentSubscription, StreamSubscription, SubscriptionMessage, Unsubscriber,
};
pub use types::{
    AppendResult, EventData, NackAction, PersistentSubscriptionSettings, ReadRevision,
    RecordedEvent, ResolvedEvent, CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON,
};
