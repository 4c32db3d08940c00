//! # In-Memory Stream Store
//!
//! A complete [`EventStoreClient`] held in process memory.
//!
//! Suitable for single-process operation and tests; production deployments
//! plug a networked client into the same trait.
//!
//! ## Delivery Model
//!
//! - **Catch-up:** history after the requested revision, then `CaughtUp`, then live appends.
//! - **Persistent:** every event from the group's start that has not been settled
//!   (acked, parked or skipped) is delivered on connect; live appends go to one
//!   connected consumer. `Retry` nacks redeliver immediately until the group's
//!   `max_retry_count` is spent, then the event is parked.
//!
//! ## Fault Injection
//!
//! Creation failures per group, a budget of failing subscribe calls per stream,
//! append failures, and forced close/error of every subscription on a stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::client::EventStoreClient;
use crate::error::StoreError;
use crate::subscription::{
    AckCommand, PersistentSubscription, StreamSubscription, SubscriptionMessage, Unsubscriber,
};
use crate::types::{
    AppendResult, EventData, NackAction, PersistentSubscriptionSettings, ReadRevision,
    RecordedEvent, ResolvedEvent,
};

type GroupKey = (String, String);

fn group_key(stream: &str, group: &str) -> GroupKey {
    (stream.to_string(), group.to_string())
}

/// A negative acknowledgement as received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRecord {
    pub event_id: Uuid,
    pub action: NackAction,
    pub reason: String,
}

struct Subscriber {
    sender: mpsc::UnboundedSender<SubscriptionMessage>,
    stop: Unsubscriber,
}

impl Subscriber {
    fn is_open(&self) -> bool {
        !self.stop.is_unsubscribed() && !self.sender.is_closed()
    }

    fn send(&self, message: SubscriptionMessage) -> bool {
        self.is_open() && self.sender.send(message).is_ok()
    }
}

struct GroupState {
    settings: PersistentSubscriptionSettings,
    start_revision: usize,
    subscribers: Vec<Subscriber>,
    settled: HashSet<Uuid>,
    retries: HashMap<Uuid, u32>,
    acked: Vec<Uuid>,
    nacked: Vec<NackRecord>,
    parked: Vec<Uuid>,
}

impl GroupState {
    fn park(&mut self, event_id: Uuid) {
        self.parked.push(event_id);
        self.settled.insert(event_id);
        self.retries.remove(&event_id);
    }
}

#[derive(Default)]
struct StoreState {
    streams: HashMap<String, Vec<RecordedEvent>>,
    commit_position: u64,
    stream_subscribers: HashMap<String, Vec<Subscriber>>,
    groups: HashMap<GroupKey, GroupState>,

    // Faults
    creation_failures: HashMap<GroupKey, StoreError>,
    subscribe_failures: HashMap<String, u32>,
    append_failure: Option<StoreError>,

    // Observation
    creation_attempts: HashMap<GroupKey, usize>,
    persistent_subscribe_attempts: HashMap<GroupKey, usize>,
    stream_subscribe_attempts: HashMap<String, usize>,
}

impl StoreState {
    fn take_subscribe_failure(&mut self, stream: &str) -> Option<StoreError> {
        let remaining = self.subscribe_failures.get_mut(stream)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(StoreError::Connection(format!(
            "injected subscribe failure on {stream}"
        )))
    }

    fn fan_out(&mut self, stream: &str, resolved: &ResolvedEvent) {
        if let Some(subscribers) = self.stream_subscribers.get_mut(stream) {
            subscribers.retain(|sub| sub.send(SubscriptionMessage::Event(resolved.clone())));
        }

        for ((group_stream, _), group) in self.groups.iter_mut() {
            if group_stream != stream {
                continue;
            }
            group.subscribers.retain(Subscriber::is_open);
            if let Some(consumer) = group.subscribers.first() {
                consumer.send(SubscriptionMessage::Event(resolved.clone()));
            }
        }
    }

    fn find_event(&self, stream: &str, event_id: Uuid) -> Option<RecordedEvent> {
        self.streams
            .get(stream)?
            .iter()
            .find(|event| event.id == event_id)
            .cloned()
    }

    fn settle(&mut self, stream: &str, group: &str, command: AckCommand) {
        let retry = {
            let Some(state) = self.groups.get_mut(&group_key(stream, group)) else {
                return;
            };
            match command {
                AckCommand::Ack { event_id } => {
                    state.acked.push(event_id);
                    state.settled.insert(event_id);
                    state.retries.remove(&event_id);
                    None
                }
                AckCommand::Nack {
                    action,
                    reason,
                    event_id,
                } => {
                    state.nacked.push(NackRecord {
                        event_id,
                        action,
                        reason,
                    });
                    match action {
                        NackAction::Park => {
                            state.park(event_id);
                            None
                        }
                        NackAction::Skip => {
                            state.settled.insert(event_id);
                            state.retries.remove(&event_id);
                            None
                        }
                        NackAction::Retry => {
                            let retries = state.retries.entry(event_id).or_default();
                            *retries += 1;
                            if *retries > state.settings.max_retry_count {
                                debug!(
                                    stream = stream,
                                    group = group,
                                    event_id = %event_id,
                                    "Retry budget spent, parking event"
                                );
                                state.park(event_id);
                                None
                            } else {
                                Some(event_id)
                            }
                        }
                        NackAction::Stop => {
                            state.subscribers.clear();
                            None
                        }
                    }
                }
            }
        };

        if let Some(event_id) = retry {
            let Some(event) = self.find_event(stream, event_id) else {
                return;
            };
            if let Some(state) = self.groups.get_mut(&group_key(stream, group)) {
                state.subscribers.retain(Subscriber::is_open);
                if let Some(consumer) = state.subscribers.first() {
                    consumer.send(SubscriptionMessage::Event(ResolvedEvent::from_event(event)));
                }
            }
        }
    }
}

/// Stream store kept entirely in memory.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // FAULT INJECTION
    // =========================================================================

    /// Make every creation attempt for `group` on `stream` fail with `error`.
    pub fn fail_persistent_creation(&self, stream: &str, group: &str, error: StoreError) {
        self.state
            .lock()
            .creation_failures
            .insert(group_key(stream, group), error);
    }

    /// Make the next `attempts` subscribe calls on `stream` fail.
    pub fn fail_next_subscribes(&self, stream: &str, attempts: u32) {
        self.state
            .lock()
            .subscribe_failures
            .insert(stream.to_string(), attempts);
    }

    /// Make appends fail with `error`, or succeed again with `None`.
    pub fn fail_appends(&self, error: Option<StoreError>) {
        self.state.lock().append_failure = error;
    }

    /// Close every open subscription on `stream`. Returns how many were closed.
    pub fn close_subscriptions(&self, stream: &str) -> usize {
        let mut state = self.state.lock();
        let mut closed = state
            .stream_subscribers
            .remove(stream)
            .map_or(0, |subs| subs.len());
        for ((group_stream, _), group) in state.groups.iter_mut() {
            if group_stream == stream {
                closed += group.subscribers.len();
                group.subscribers.clear();
            }
        }
        debug!(stream = stream, closed = closed, "Closed subscriptions");
        closed
    }

    /// Deliver `error` to every open subscription on `stream`, then close them.
    pub fn error_subscriptions(&self, stream: &str, error: StoreError) -> usize {
        let mut state = self.state.lock();
        let mut affected = 0;
        if let Some(subs) = state.stream_subscribers.remove(stream) {
            for sub in subs {
                sub.send(SubscriptionMessage::Error(error.clone()));
                affected += 1;
            }
        }
        for ((group_stream, _), group) in state.groups.iter_mut() {
            if group_stream == stream {
                for sub in group.subscribers.drain(..) {
                    sub.send(SubscriptionMessage::Error(error.clone()));
                    affected += 1;
                }
            }
        }
        affected
    }

    /// Push an arbitrary resolved event to the live subscribers of `stream`
    /// without persisting it (links to deleted events, foreign payloads).
    pub fn inject(&self, stream: &str, resolved: ResolvedEvent) {
        self.state.lock().fan_out(stream, &resolved);
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    /// All events persisted in `stream`.
    #[must_use]
    pub fn read_stream(&self, stream: &str) -> Vec<RecordedEvent> {
        self.state
            .lock()
            .streams
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the persistent subscription group exists.
    #[must_use]
    pub fn group_exists(&self, stream: &str, group: &str) -> bool {
        self.state
            .lock()
            .groups
            .contains_key(&group_key(stream, group))
    }

    /// Settings the group was created with.
    #[must_use]
    pub fn group_settings(&self, stream: &str, group: &str) -> Option<PersistentSubscriptionSettings> {
        self.state
            .lock()
            .groups
            .get(&group_key(stream, group))
            .map(|g| g.settings.clone())
    }

    /// Event ids positively acknowledged on the group.
    #[must_use]
    pub fn acked(&self, stream: &str, group: &str) -> Vec<Uuid> {
        self.state
            .lock()
            .groups
            .get(&group_key(stream, group))
            .map(|g| g.acked.clone())
            .unwrap_or_default()
    }

    /// Negative acknowledgements received on the group.
    #[must_use]
    pub fn nacked(&self, stream: &str, group: &str) -> Vec<NackRecord> {
        self.state
            .lock()
            .groups
            .get(&group_key(stream, group))
            .map(|g| g.nacked.clone())
            .unwrap_or_default()
    }

    /// Event ids parked on the group.
    #[must_use]
    pub fn parked(&self, stream: &str, group: &str) -> Vec<Uuid> {
        self.state
            .lock()
            .groups
            .get(&group_key(stream, group))
            .map(|g| g.parked.clone())
            .unwrap_or_default()
    }

    /// Number of creation calls made for the group.
    #[must_use]
    pub fn creation_attempts(&self, stream: &str, group: &str) -> usize {
        self.state
            .lock()
            .creation_attempts
            .get(&group_key(stream, group))
            .copied()
            .unwrap_or(0)
    }

    /// Number of persistent subscribe calls made for the group.
    #[must_use]
    pub fn persistent_subscribe_attempts(&self, stream: &str, group: &str) -> usize {
        self.state
            .lock()
            .persistent_subscribe_attempts
            .get(&group_key(stream, group))
            .copied()
            .unwrap_or(0)
    }

    /// Number of catch-up/volatile subscribe calls made for the stream.
    #[must_use]
    pub fn stream_subscribe_attempts(&self, stream: &str) -> usize {
        self.state
            .lock()
            .stream_subscribe_attempts
            .get(stream)
            .copied()
            .unwrap_or(0)
    }

    /// Number of open subscriptions (both kinds) on the stream.
    #[must_use]
    pub fn open_subscriptions(&self, stream: &str) -> usize {
        let state = self.state.lock();
        let catch_up = state
            .stream_subscribers
            .get(stream)
            .map_or(0, |subs| subs.iter().filter(|s| s.is_open()).count());
        let persistent: usize = state
            .groups
            .iter()
            .filter(|((group_stream, _), _)| group_stream == stream)
            .map(|(_, g)| g.subscribers.iter().filter(|s| s.is_open()).count())
            .sum();
        catch_up + persistent
    }
}

#[async_trait]
impl EventStoreClient for InMemoryEventStore {
    async fn append_to_stream(
        &self,
        stream: &str,
        events: Vec<EventData>,
    ) -> Result<AppendResult, StoreError> {
        let mut state = self.state.lock();
        if let Some(error) = state.append_failure.clone() {
            return Err(error);
        }

        let mut appended = Vec::with_capacity(events.len());
        for proposed in events {
            let revision = state.streams.get(stream).map_or(0, Vec::len) as u64;
            state.commit_position += 1;
            let recorded = RecordedEvent {
                stream_id: stream.to_string(),
                id: proposed.id,
                revision,
                is_json: proposed.is_json(),
                event_type: proposed.event_type,
                data: proposed.data,
                metadata: proposed.metadata.unwrap_or_default(),
                created: Utc::now(),
            };
            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .push(recorded.clone());
            appended.push(ResolvedEvent {
                event: Some(recorded),
                link: None,
                commit_position: Some(state.commit_position),
            });
        }

        for resolved in &appended {
            state.fan_out(stream, resolved);
        }

        let next_expected_revision = state.streams.get(stream).map_or(0, Vec::len) as u64;
        Ok(AppendResult {
            next_expected_revision,
            position: Some(state.commit_position),
        })
    }

    async fn create_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
        settings: &PersistentSubscriptionSettings,
    ) -> Result<(), StoreError> {
        let key = group_key(stream, group);
        let mut state = self.state.lock();
        *state.creation_attempts.entry(key.clone()).or_default() += 1;

        if let Some(error) = state.creation_failures.get(&key) {
            return Err(error.clone());
        }
        if state.groups.contains_key(&key) {
            return Err(StoreError::PersistentSubscriptionExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let start_revision = if settings.from_start {
            0
        } else {
            state.streams.get(stream).map_or(0, Vec::len)
        };
        state.groups.insert(
            key,
            GroupState {
                settings: settings.clone(),
                start_revision,
                subscribers: Vec::new(),
                settled: HashSet::new(),
                retries: HashMap::new(),
                acked: Vec::new(),
                nacked: Vec::new(),
                parked: Vec::new(),
            },
        );
        Ok(())
    }

    async fn subscribe_to_stream(
        &self,
        stream: &str,
        from: ReadRevision,
    ) -> Result<StreamSubscription, StoreError> {
        let mut state = self.state.lock();
        *state
            .stream_subscribe_attempts
            .entry(stream.to_string())
            .or_default() += 1;
        if let Some(error) = state.take_subscribe_failure(stream) {
            return Err(error);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = Unsubscriber::new();

        let history = state.streams.get(stream).cloned().unwrap_or_default();
        let replay: Vec<RecordedEvent> = match from {
            ReadRevision::Start => history,
            ReadRevision::After(revision) => history
                .into_iter()
                .filter(|event| event.revision > revision)
                .collect(),
            ReadRevision::End => Vec::new(),
        };
        for event in replay {
            // Receiver is held locally, send cannot fail here.
            let _ = sender.send(SubscriptionMessage::Event(ResolvedEvent::from_event(event)));
        }
        if from != ReadRevision::End {
            let _ = sender.send(SubscriptionMessage::CaughtUp);
        }

        state
            .stream_subscribers
            .entry(stream.to_string())
            .or_default()
            .push(Subscriber {
                sender,
                stop: stop.clone(),
            });

        Ok(StreamSubscription::new(stream, receiver, stop))
    }

    async fn subscribe_to_persistent_subscription(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<PersistentSubscription, StoreError> {
        let key = group_key(stream, group);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (ack_sender, mut ack_receiver) = mpsc::unbounded_channel::<AckCommand>();
        let stop = Unsubscriber::new();

        {
            let mut state = self.state.lock();
            *state
                .persistent_subscribe_attempts
                .entry(key.clone())
                .or_default() += 1;
            if let Some(error) = state.take_subscribe_failure(stream) {
                return Err(error);
            }

            let history = state.streams.get(stream).cloned().unwrap_or_default();
            let Some(group_state) = state.groups.get_mut(&key) else {
                return Err(StoreError::PersistentSubscriptionNotFound {
                    stream: stream.to_string(),
                    group: group.to_string(),
                });
            };

            for event in history.into_iter().skip(group_state.start_revision) {
                if group_state.settled.contains(&event.id) {
                    continue;
                }
                let _ = sender.send(SubscriptionMessage::Event(ResolvedEvent::from_event(event)));
            }
            group_state.subscribers.push(Subscriber {
                sender,
                stop: stop.clone(),
            });
        }

        let store = Arc::clone(&self.state);
        let (ack_stream, ack_group) = key;
        tokio::spawn(async move {
            while let Some(command) = ack_receiver.recv().await {
                store.lock().settle(&ack_stream, &ack_group, command);
            }
            debug!(stream = %ack_stream, group = %ack_group, "Ack channel closed");
        });

        Ok(PersistentSubscription::new(
            stream, group, receiver, ack_sender, stop,
        ))
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryEventStore")
            .field("streams", &state.streams.len())
            .field("groups", &state.groups.len())
            .finish()
    }
}
