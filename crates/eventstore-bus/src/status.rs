//! Observable per-subscription state.

use crate::config::SubscriptionDescriptor;

/// Lifecycle state of one configured subscription.
///
/// Persistent: `Unverified → Creating → {Created | AlreadyExists | CreationFailed} → Subscribing → {Live | Dropped}`.
/// Catch-up: `Unverified → Subscribing → {Live | Dropped}`.
/// Any state ends in `Stopped` after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unverified,
    Creating,
    Created,
    AlreadyExists,
    CreationFailed,
    Subscribing,
    Live,
    Dropped,
    Stopped,
}

impl SubscriptionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::AlreadyExists => "already_exists",
            Self::CreationFailed => "creation_failed",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Dropped => "dropped",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub descriptor: SubscriptionDescriptor,
    pub state: SubscriptionState,
    /// An established handle exists and its connection is open.
    pub is_live: bool,
    /// Creation succeeded or the group already existed. Always false for catch-up.
    pub is_created: bool,
    /// Reconnect attempts in the current outage.
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}
