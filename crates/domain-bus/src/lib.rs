//! # Domain Bus - In-Process Event Sequence
//!
//! The append-only observable sequence that reconstructed store events are
//! pushed onto, and that application handlers and sagas subscribe to.
//!
//! ```text
//! ┌──────────────┐   emit()    ┌──────────────┐  subscribe(filter)  ┌──────────────┐
//! │  Dispatcher  │ ──────────→ │  Event Bus   │ ──────────────────→ │   Handlers   │
//! └──────────────┘             └──────────────┘                     └──────────────┘
//! ```
//!
//! Publishing never blocks on consumers. A lagging subscriber loses the
//! oldest events rather than slowing the producer.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{DomainEvent, EventFilter, SharedEvent};
pub use publisher::{EventPublisher, InProcessEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

// Used by `domain_event!`
#[doc(hidden)]
pub use serde_json;

/// Maximum events to buffer per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
