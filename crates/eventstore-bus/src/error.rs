//! # Error Types
//!
//! Delivery errors are recovered per event. Bus errors surface to the caller.

use store_client::StoreError;
use thiserror::Error;

/// A single delivery could not be turned into a domain event.
///
/// On a persistent subscription this becomes a nack; on a catch-up
/// subscription it is logged and the event is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The payload claimed to be JSON but did not parse.
    #[error("Malformed payload for {event_type}: {reason}")]
    Payload { event_type: String, reason: String },

    /// The registered constructor rejected the positional fields.
    #[error("Could not reconstruct {event_type}: {reason}")]
    Reconstruction { event_type: String, reason: String },

    /// The registered constructor panicked.
    #[error("Constructor for {event_type} panicked: {message}")]
    HandlerPanicked { event_type: String, message: String },
}

/// Errors surfaced by the bus to its caller.
#[derive(Debug, Error)]
pub enum BusError {
    /// Invalid descriptors or connection settings. Nothing was started.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Not every persistent subscription could be created, so none were opened.
    #[error("Persistent subscriptions created {created} != {expected} configured")]
    PersistentCountMismatch { created: usize, expected: usize },

    /// `start` was called on a bus that already started.
    #[error("Bus already started")]
    AlreadyStarted,

    /// Opening a subscription failed.
    #[error("Subscribe to {stream} failed: {source}")]
    Subscribe {
        stream: String,
        #[source]
        source: StoreError,
    },

    /// The append call failed. Not retried.
    #[error("Publish to {stream} failed: {source}")]
    Publish {
        stream: String,
        #[source]
        source: StoreError,
    },

    /// An outgoing event could not be encoded.
    #[error("Could not serialize {event_type}: {reason}")]
    Serialization { event_type: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mismatch_display() {
        let err = BusError::PersistentCountMismatch {
            created: 1,
            expected: 2,
        };
        assert!(err.to_string().contains("1 != 2"));
    }

    #[test]
    fn test_publish_error_keeps_source() {
        let err = BusError::Publish {
            stream: "orders".into(),
            source: StoreError::Connection("reset".into()),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Connection error: reset"));
    }
}
