//! # Domain Events
//!
//! The capability every event flowing through the in-process bus implements,
//! plus the filter consumers use to select events.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// An application-defined event.
///
/// Events are shared between subscribers, so they travel as [`SharedEvent`].
pub trait DomainEvent: Send + Sync + fmt::Debug + 'static {
    /// Type tag written to the store and used for handler lookup.
    fn event_type(&self) -> &'static str;

    /// JSON payload written to the store.
    ///
    /// # Errors
    ///
    /// The serializer error if the event cannot be encoded.
    fn payload(&self) -> serde_json::Result<Value>;

    /// Target stream when the event is re-published (e.g. saga writes).
    fn stream_name(&self) -> Option<&str> {
        None
    }

    /// Access to the concrete type for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl dyn DomainEvent {
    /// Downcast to a concrete event type.
    #[must_use]
    pub fn downcast_ref<T: DomainEvent>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether the event is of concrete type `T`.
    #[must_use]
    pub fn is<T: DomainEvent>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Reference-counted event as carried by the bus.
pub type SharedEvent = Arc<dyn DomainEvent>;

/// Implement [`DomainEvent`] for a `Serialize` struct.
///
/// The type tag is the struct name. The `stream = field` form binds an
/// `Option<String>` field as the target stream.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct OrderPlaced { id: u64 }
/// domain_event!(OrderPlaced);
/// ```
#[macro_export]
macro_rules! domain_event {
    ($ty:ident) => {
        impl $crate::DomainEvent for $ty {
            fn event_type(&self) -> &'static str {
                stringify!($ty)
            }

            fn payload(&self) -> $crate::serde_json::Result<$crate::serde_json::Value> {
                $crate::serde_json::to_value(self)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
    ($ty:ident, stream = $field:ident) => {
        impl $crate::DomainEvent for $ty {
            fn event_type(&self) -> &'static str {
                stringify!($ty)
            }

            fn payload(&self) -> $crate::serde_json::Result<$crate::serde_json::Value> {
                $crate::serde_json::to_value(self)
            }

            fn stream_name(&self) -> Option<&str> {
                self.$field.as_deref()
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Filter for subscribing to a subset of events.
///
/// Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Event type tags to accept.
    pub event_types: Vec<String>,
    /// Target streams to accept.
    pub streams: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific event types.
    #[must_use]
    pub fn event_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: types.into_iter().map(Into::into).collect(),
            streams: Vec::new(),
        }
    }

    /// Create a filter for events targeting specific streams.
    #[must_use]
    pub fn streams<I, S>(streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: Vec::new(),
            streams: streams.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &dyn DomainEvent) -> bool {
        let type_match = self.event_types.is_empty()
            || self.event_types.iter().any(|t| t == event.event_type());

        let stream_match = self.streams.is_empty()
            || event
                .stream_name()
                .is_some_and(|stream| self.streams.iter().any(|s| s == stream));

        type_match && stream_match
    }

    /// Key used for subscription accounting.
    pub(crate) fn key(&self) -> String {
        format!("types={:?};streams={:?}", self.event_types, self.streams)
    }
}
