//! # Wire Types
//!
//! Values exchanged with the stream store: proposed events going out,
//! recorded/resolved events coming back, and subscription settings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type for JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type for opaque binary payloads.
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// An event as persisted in a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Stream the event belongs to.
    pub stream_id: String,
    /// Globally unique event id.
    pub id: Uuid,
    /// Zero-based position within the stream.
    pub revision: u64,
    /// Type tag written by the publisher.
    pub event_type: String,
    /// Raw payload.
    pub data: Vec<u8>,
    /// Raw metadata (empty when none was written).
    pub metadata: Vec<u8>,
    /// Whether `data` was written as JSON.
    pub is_json: bool,
    /// Time the store accepted the event.
    pub created: DateTime<Utc>,
}

/// An event delivered by a subscription, with its link resolution.
///
/// `event` is absent when a link points at a deleted or unreadable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub event: Option<RecordedEvent>,
    pub link: Option<RecordedEvent>,
    pub commit_position: Option<u64>,
}

impl ResolvedEvent {
    /// Wrap a plain (non-link) recorded event.
    #[must_use]
    pub fn from_event(event: RecordedEvent) -> Self {
        Self {
            event: Some(event),
            link: None,
            commit_position: None,
        }
    }

    /// Id used to acknowledge this delivery: the event id, falling back to the link id.
    #[must_use]
    pub fn original_id(&self) -> Option<Uuid> {
        self.event
            .as_ref()
            .or(self.link.as_ref())
            .map(|event| event.id)
    }

    /// Stream the delivery originated from.
    #[must_use]
    pub fn original_stream_id(&self) -> Option<&str> {
        self.event
            .as_ref()
            .or(self.link.as_ref())
            .map(|event| event.stream_id.as_str())
    }
}

/// An event proposed for appending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub id: Uuid,
    pub event_type: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
    pub metadata: Option<Vec<u8>>,
}

impl EventData {
    /// Build a JSON event with a fresh v4 id.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `payload` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            content_type: CONTENT_TYPE_JSON,
            data: serde_json::to_vec(payload)?,
            metadata: None,
        })
    }

    /// Build a binary event with a fresh v4 id.
    #[must_use]
    pub fn binary(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            content_type: CONTENT_TYPE_BINARY,
            data,
            metadata: None,
        }
    }

    /// Attach JSON metadata.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `metadata` cannot be encoded.
    pub fn with_metadata<T: Serialize + ?Sized>(
        mut self,
        metadata: &T,
    ) -> Result<Self, serde_json::Error> {
        self.metadata = Some(serde_json::to_vec(metadata)?);
        Ok(self)
    }

    /// Whether the payload is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type == CONTENT_TYPE_JSON
    }
}

/// Where a stream subscription begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadRevision {
    /// Replay from the first event, then continue live.
    #[default]
    Start,
    /// Only events appended after subscribing (volatile subscription).
    End,
    /// Events strictly after the given revision.
    After(u64),
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Revision the next append should expect.
    pub next_expected_revision: u64,
    /// Global commit position of the last written event, when the backend has one.
    pub position: Option<u64>,
}

/// Server-side settings for a persistent subscription group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentSubscriptionSettings {
    /// Deliver the event a link points to instead of the link itself.
    pub resolve_links: bool,
    /// Start the group at the beginning of the stream rather than its end.
    pub from_start: bool,
    /// Redeliveries before an event is parked by the server.
    pub max_retry_count: u32,
    /// Time the server waits for an ack before redelivering.
    pub message_timeout: Duration,
}

impl Default for PersistentSubscriptionSettings {
    fn default() -> Self {
        Self {
            resolve_links: true,
            from_start: true,
            max_retry_count: 10,
            message_timeout: Duration::from_secs(30),
        }
    }
}

/// Disposition carried by a negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NackAction {
    /// Move the event to the parked queue.
    #[default]
    Park,
    /// Redeliver the event.
    Retry,
    /// Discard the event.
    Skip,
    /// Stop the subscription.
    Stop,
}

impl NackAction {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Park => "park",
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Stop => "stop",
        }
    }
}

impl std::str::FromStr for NackAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "park" => Ok(Self::Park),
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown nack action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(id: Uuid) -> RecordedEvent {
        RecordedEvent {
            stream_id: "orders".into(),
            id,
            revision: 0,
            event_type: "OrderPlaced".into(),
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            is_json: true,
            created: Utc::now(),
        }
    }

    #[test]
    fn test_json_event_gets_fresh_id() {
        let a = EventData::json("OrderPlaced", &serde_json::json!({"id": 1})).unwrap();
        let b = EventData::json("OrderPlaced", &serde_json::json!({"id": 1})).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.is_json());
        assert_eq!(a.data, br#"{"id":1}"#.to_vec());
    }

    #[test]
    fn test_binary_event_is_not_json() {
        let event = EventData::binary("Blob", vec![1, 2, 3]);
        assert!(!event.is_json());
    }

    #[test]
    fn test_original_id_prefers_event_over_link() {
        let event_id = Uuid::new_v4();
        let link_id = Uuid::new_v4();
        let resolved = ResolvedEvent {
            event: Some(recorded(event_id)),
            link: Some(recorded(link_id)),
            commit_position: None,
        };
        assert_eq!(resolved.original_id(), Some(event_id));

        let link_only = ResolvedEvent {
            event: None,
            link: Some(recorded(link_id)),
            commit_position: None,
        };
        assert_eq!(link_only.original_id(), Some(link_id));
    }

    #[test]
    fn test_nack_action_parse() {
        assert_eq!("PARK".parse::<NackAction>().unwrap(), NackAction::Park);
        assert_eq!("retry".parse::<NackAction>().unwrap(), NackAction::Retry);
        assert!("later".parse::<NackAction>().is_err());
    }

    #[test]
    fn test_default_settings_resolve_links() {
        let settings = PersistentSubscriptionSettings::default();
        assert!(settings.resolve_links);
        assert!(settings.from_start);
    }
}
