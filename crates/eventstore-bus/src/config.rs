//! # Bus Configuration
//!
//! Subscription descriptors and the tunables of the supervisor. Supplied once
//! at construction and validated before anything touches the store.
//!
//! ## Descriptor Syntax
//!
//! | Text | Meaning |
//! |------|---------|
//! | `catch-up:orders` | Replay `orders` from the start, then live |
//! | `catch-up:orders@41` | Replay events after revision 41, then live |
//! | `volatile:orders` | Live events only |
//! | `persistent:payments/sub-b` | Persistent group `sub-b` on `payments` |

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use store_client::{NackAction, PersistentSubscriptionSettings, ReadRevision};

use crate::error::BusError;

/// Stream written to when no explicit stream is given.
pub const DEFAULT_STREAM: &str = "$svc-catch-all";

/// Delay before a dropped persistent subscription is reopened.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// The two subscription kinds the supervisor manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    CatchUp,
    Persistent,
}

impl SubscriptionKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CatchUp => "catch_up",
            Self::Persistent => "persistent",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionDescriptor {
    /// Catch-up (or volatile, with `ReadRevision::End`) subscription.
    CatchUp { stream: String, from: ReadRevision },
    /// Server-tracked persistent subscription group.
    Persistent { stream: String, group: String },
}

impl SubscriptionDescriptor {
    /// Catch-up subscription from the start of `stream`.
    #[must_use]
    pub fn catch_up(stream: impl Into<String>) -> Self {
        Self::CatchUp {
            stream: stream.into(),
            from: ReadRevision::Start,
        }
    }

    /// Live-only subscription on `stream`.
    #[must_use]
    pub fn volatile(stream: impl Into<String>) -> Self {
        Self::CatchUp {
            stream: stream.into(),
            from: ReadRevision::End,
        }
    }

    /// Persistent subscription group `group` on `stream`.
    #[must_use]
    pub fn persistent(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self::Persistent {
            stream: stream.into(),
            group: group.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::CatchUp { .. } => SubscriptionKind::CatchUp,
            Self::Persistent { .. } => SubscriptionKind::Persistent,
        }
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        match self {
            Self::CatchUp { stream, .. } | Self::Persistent { stream, .. } => stream,
        }
    }

    /// Group name, for persistent descriptors.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        match self {
            Self::CatchUp { .. } => None,
            Self::Persistent { group, .. } => Some(group),
        }
    }
}

impl fmt::Display for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CatchUp {
                stream,
                from: ReadRevision::Start,
            } => write!(f, "catch-up:{stream}"),
            Self::CatchUp {
                stream,
                from: ReadRevision::After(revision),
            } => write!(f, "catch-up:{stream}@{revision}"),
            Self::CatchUp {
                stream,
                from: ReadRevision::End,
            } => write!(f, "volatile:{stream}"),
            Self::Persistent { stream, group } => write!(f, "persistent:{stream}/{group}"),
        }
    }
}

impl FromStr for SubscriptionDescriptor {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BusError::Configuration(format!("{reason}: '{s}'"));

        let (kind, target) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("descriptor needs a kind prefix"))?;

        match kind.trim() {
            "catch-up" | "catchup" => match target.rsplit_once('@') {
                Some((stream, revision)) => {
                    let revision = revision
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| invalid("revision is not a number"))?;
                    Ok(Self::CatchUp {
                        stream: stream.trim().to_string(),
                        from: ReadRevision::After(revision),
                    })
                }
                None => Ok(Self::catch_up(target.trim())),
            },
            "volatile" => Ok(Self::volatile(target.trim())),
            "persistent" => {
                let (stream, group) = target
                    .rsplit_once('/')
                    .ok_or_else(|| invalid("persistent descriptor needs stream/group"))?;
                Ok(Self::persistent(stream.trim(), group.trim()))
            }
            _ => Err(invalid("unknown subscription kind")),
        }
    }
}

/// Configuration for [`crate::EventStoreBus`].
#[derive(Debug, Clone)]
pub struct EventStoreBusConfig {
    /// Subscriptions to open, in configuration order.
    pub subscriptions: Vec<SubscriptionDescriptor>,

    /// Fixed delay between reconnect attempts of a persistent subscription.
    pub reconnect_delay: Duration,

    /// Consecutive failed reconnects before giving up (`None` = never).
    pub max_reconnect_attempts: Option<u32>,

    /// Disposition sent with a nack when dispatch fails.
    pub nack_action: NackAction,

    /// Settings used when creating persistent subscription groups.
    pub persistent_settings: PersistentSubscriptionSettings,

    /// Stream used by `publish` when none is given.
    pub default_stream: String,
}

impl Default for EventStoreBusConfig {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
            nack_action: NackAction::Park,
            persistent_settings: PersistentSubscriptionSettings::default(),
            default_stream: DEFAULT_STREAM.to_string(),
        }
    }
}

impl EventStoreBusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ES_BUS_SUBSCRIPTIONS`: Comma separated descriptors (default: none)
    /// - `ES_BUS_RECONNECT_DELAY_MS`: Reconnect delay (default: 3000)
    /// - `ES_BUS_MAX_RECONNECT_ATTEMPTS`: Reconnect limit (default: unbounded)
    /// - `ES_BUS_NACK_ACTION`: park, retry, skip or stop (default: park)
    /// - `ES_BUS_DEFAULT_STREAM`: Default publish stream (default: `$svc-catch-all`)
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` for any value that is present but malformed.
    pub fn from_env() -> Result<Self, BusError> {
        let mut config = Self::default();

        if let Ok(value) = env::var("ES_BUS_SUBSCRIPTIONS") {
            config.subscriptions = parse_descriptors(&value)?;
        }

        if let Ok(value) = env::var("ES_BUS_RECONNECT_DELAY_MS") {
            let millis = value.trim().parse::<u64>().map_err(|_| {
                BusError::Configuration(format!("ES_BUS_RECONNECT_DELAY_MS is not a number: {value}"))
            })?;
            config.reconnect_delay = Duration::from_millis(millis);
        }

        if let Ok(value) = env::var("ES_BUS_MAX_RECONNECT_ATTEMPTS") {
            let attempts = value.trim().parse::<u32>().map_err(|_| {
                BusError::Configuration(format!(
                    "ES_BUS_MAX_RECONNECT_ATTEMPTS is not a number: {value}"
                ))
            })?;
            config.max_reconnect_attempts = Some(attempts);
        }

        if let Ok(value) = env::var("ES_BUS_NACK_ACTION") {
            config.nack_action = value.parse().map_err(BusError::Configuration)?;
        }

        if let Ok(value) = env::var("ES_BUS_DEFAULT_STREAM") {
            config.default_stream = value.trim().to_string();
        }

        Ok(config)
    }

    /// Add a subscription.
    #[must_use]
    pub fn with_subscription(mut self, descriptor: SubscriptionDescriptor) -> Self {
        self.subscriptions.push(descriptor);
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Descriptors of one kind, in configuration order.
    pub fn descriptors(
        &self,
        kind: SubscriptionKind,
    ) -> impl Iterator<Item = &SubscriptionDescriptor> + '_ {
        self.subscriptions.iter().filter(move |d| d.kind() == kind)
    }

    /// Reject configurations the supervisor cannot run.
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` naming the first offending descriptor.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.default_stream.trim().is_empty() {
            return Err(BusError::Configuration(
                "default stream name is empty".to_string(),
            ));
        }

        let mut groups = HashSet::new();
        for descriptor in &self.subscriptions {
            if descriptor.stream().trim().is_empty() {
                return Err(BusError::Configuration(format!(
                    "{descriptor} has an empty stream name"
                )));
            }
            if let SubscriptionDescriptor::Persistent { stream, group } = descriptor {
                if group.trim().is_empty() {
                    return Err(BusError::Configuration(format!(
                        "persistent subscription on {stream} has no subscription name"
                    )));
                }
                if !groups.insert((stream.as_str(), group.as_str())) {
                    return Err(BusError::Configuration(format!(
                        "persistent subscription {group} configured twice on {stream}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parse a comma separated descriptor list.
///
/// # Errors
///
/// `BusError::Configuration` for the first malformed entry.
pub fn parse_descriptors(value: &str) -> Result<Vec<SubscriptionDescriptor>, BusError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}
