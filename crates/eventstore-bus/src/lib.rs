//! # EventStore Bus - Subscription Lifecycle Manager
//!
//! Keeps a set of store subscriptions live and turns what they deliver into
//! in-process domain events.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  deliveries  ┌──────────────┐  rebuilt event  ┌──────────────┐
//! │ Supervisor   │ ───────────→ │  Dispatcher  │ ──────────────→ │ In-process   │
//! │ (catch-up +  │ ←─────────── │  + Registry  │                 │ event bus    │
//! │  persistent) │   ack/nack   └──────────────┘                 └──────────────┘
//! └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **All-or-nothing persistent startup:** no persistent subscription opens
//!   unless every configured group was created or already existed
//! - **At-least-once:** a persistent delivery is acked only after a successful
//!   dispatch and nacked exactly once otherwise
//! - **Recovery:** dropped persistent subscriptions reopen after a fixed delay;
//!   dropped catch-up subscriptions stay closed

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod publisher;
pub mod registry;
pub mod status;
pub mod supervisor;

pub use bus::EventStoreBus;
pub use config::{
    parse_descriptors, EventStoreBusConfig, SubscriptionDescriptor, SubscriptionKind,
    DEFAULT_RECONNECT_DELAY, DEFAULT_STREAM,
};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use error::{BusError, DispatchError};
pub use publisher::StorePublisher;
pub use registry::{EventConstructor, HandlerRegistry};
pub use status::{SubscriptionState, SubscriptionStatus};
pub use supervisor::SubscriptionSupervisor;
