//! # Error Types
//!
//! Errors surfaced by a stream store backend.

use thiserror::Error;

/// Errors that can occur while talking to the stream store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A persistent subscription group already exists on the stream.
    ///
    /// Creation is idempotent from the caller's point of view; this variant
    /// must stay distinguishable from every other failure.
    #[error("Persistent subscription {group} already exists on stream {stream}")]
    PersistentSubscriptionExists { stream: String, group: String },

    /// The persistent subscription group has not been created.
    #[error("Persistent subscription {group} not found on stream {stream}")]
    PersistentSubscriptionNotFound { stream: String, group: String },

    /// The stream does not exist.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Transport-level failure (connection refused, reset, timed out).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or incomplete connection settings.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The store rejected an append.
    #[error("Append to stream {stream} failed: {reason}")]
    AppendFailed { stream: String, reason: String },

    /// The subscription or client is closed.
    #[error("Subscription closed")]
    Closed,
}

impl StoreError {
    /// True when the error signals an already-existing persistent subscription.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::PersistentSubscriptionExists { .. })
    }

    /// True for failures a caller may reasonably retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Closed)
    }
}
