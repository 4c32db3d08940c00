//! # Subscription Supervisor
//!
//! Brings every configured subscription to a live state and keeps it there.
//!
//! ## Startup
//!
//! 1. Persistent groups are created concurrently. An already existing group
//!    counts as created.
//! 2. Only when every group is created are the persistent subscriptions
//!    opened. Otherwise none are, and startup reports the count mismatch.
//! 3. Catch-up subscriptions open concurrently with no gate.
//!
//! ## Drops
//!
//! Each open subscription is driven by its own task. When the connection
//! closes or errors the handle is marked not live on the spot. Persistent
//! subscriptions are then reopened after a fixed delay, retried until they
//! succeed, the bus shuts down, or the attempt limit runs out. Dropped
//! catch-up subscriptions stay dropped.
//!
//! ## Locking
//!
//! Slot state sits behind `parking_lot` locks that are never held across an
//! `.await`. The liveness queries only read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use es_telemetry::{
    EVENTS_ACKED, EVENTS_NACKED, EVENTS_RECEIVED, LIVE_SUBSCRIPTIONS, RECONNECT_ATTEMPTS,
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use store_client::{
    EventStoreClient, NackAction, PersistentSubscription, PersistentSubscriptionSettings,
    ResolvedEvent, StoreError, StreamSubscription, SubscriptionMessage, Unsubscriber,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::config::{EventStoreBusConfig, SubscriptionDescriptor, SubscriptionKind};
use crate::dispatcher::EventDispatcher;
use crate::error::BusError;
use crate::status::{SubscriptionState, SubscriptionStatus};

/// The supervisor's own wrapper around an open connection.
struct LiveHandle {
    unsubscriber: Unsubscriber,
    is_live: bool,
}

struct Slot {
    descriptor: SubscriptionDescriptor,
    state: SubscriptionState,
    is_created: bool,
    handle: Option<LiveHandle>,
    /// Bumped on every successful open so a stale drive task cannot mark a newer handle.
    generation: u64,
    reconnect_attempts: u32,
    last_error: Option<String>,
}

impl Slot {
    fn new(descriptor: SubscriptionDescriptor) -> Self {
        Self {
            descriptor,
            state: SubscriptionState::Unverified,
            is_created: false,
            handle: None,
            generation: 0,
            reconnect_attempts: 0,
            last_error: None,
        }
    }

    fn is_live(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.is_live)
    }

    fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus {
            descriptor: self.descriptor.clone(),
            state: self.state,
            is_live: self.is_live(),
            is_created: self.is_created,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
        }
    }
}

enum Connection {
    CatchUp(StreamSubscription),
    Persistent(PersistentSubscription),
}

impl Connection {
    fn unsubscriber(&self) -> Unsubscriber {
        match self {
            Self::CatchUp(sub) => sub.unsubscriber(),
            Self::Persistent(sub) => sub.unsubscriber(),
        }
    }

    async fn next(&mut self) -> Option<SubscriptionMessage> {
        match self {
            Self::CatchUp(sub) => sub.next().await,
            Self::Persistent(sub) => sub.next().await,
        }
    }
}

struct Inner {
    client: Arc<dyn EventStoreClient>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_delay: Duration,
    max_reconnect_attempts: Option<u32>,
    nack_action: NackAction,
    persistent_settings: PersistentSubscriptionSettings,
    catch_up: RwLock<Vec<Slot>>,
    persistent: RwLock<Vec<Slot>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    span: Span,
}

/// Owns and recovers the catch-up and persistent subscriptions.
pub struct SubscriptionSupervisor {
    inner: Arc<Inner>,
}

impl SubscriptionSupervisor {
    /// Build a supervisor for the descriptors in `config`.
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` if `config` does not validate.
    pub fn new(
        client: Arc<dyn EventStoreClient>,
        dispatcher: Arc<EventDispatcher>,
        config: &EventStoreBusConfig,
    ) -> Result<Self, BusError> {
        Self::with_span(
            client,
            dispatcher,
            config,
            tracing::info_span!("subscription_supervisor"),
        )
    }

    /// Same as [`SubscriptionSupervisor::new`], logging under `span`.
    ///
    /// # Errors
    ///
    /// `BusError::Configuration` if `config` does not validate.
    pub fn with_span(
        client: Arc<dyn EventStoreClient>,
        dispatcher: Arc<EventDispatcher>,
        config: &EventStoreBusConfig,
        span: Span,
    ) -> Result<Self, BusError> {
        config.validate()?;

        let slots = |kind| {
            config
                .descriptors(kind)
                .cloned()
                .map(Slot::new)
                .collect::<Vec<_>>()
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                dispatcher,
                reconnect_delay: config.reconnect_delay,
                max_reconnect_attempts: config.max_reconnect_attempts,
                nack_action: config.nack_action,
                persistent_settings: config.persistent_settings.clone(),
                catch_up: RwLock::new(slots(SubscriptionKind::CatchUp)),
                persistent: RwLock::new(slots(SubscriptionKind::Persistent)),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                span,
            }),
        })
    }

    /// Run the startup protocol.
    ///
    /// Catch-up subscriptions are opened whatever happens to the persistent ones.
    ///
    /// # Errors
    ///
    /// - `BusError::PersistentCountMismatch` - a group could not be created, so no
    ///   persistent subscription was opened
    /// - `BusError::AlreadyStarted` - called twice
    pub async fn start(&self) -> Result<(), BusError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyStarted);
        }

        let inner = &self.inner;
        let (persistent, ()) = tokio::join!(inner.start_persistent(), inner.start_catch_up());
        persistent
    }

    /// Every catch-up descriptor has an established, live handle.
    #[must_use]
    pub fn all_catch_up_live(&self) -> bool {
        self.inner.catch_up.read().iter().all(Slot::is_live)
    }

    /// Every persistent descriptor has an established, live handle.
    #[must_use]
    pub fn all_persistent_live(&self) -> bool {
        self.inner.persistent.read().iter().all(Slot::is_live)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.all_catch_up_live() && self.all_persistent_live()
    }

    /// Snapshot of every subscription: catch-up first, then persistent,
    /// each in configuration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<SubscriptionStatus> {
        let catch_up = self.inner.catch_up.read();
        let persistent = self.inner.persistent.read();
        catch_up
            .iter()
            .chain(persistent.iter())
            .map(Slot::status)
            .collect()
    }

    /// Snapshot of one subscription.
    #[must_use]
    pub fn status(&self, descriptor: &SubscriptionDescriptor) -> Option<SubscriptionStatus> {
        self.inner
            .slots(descriptor.kind())
            .read()
            .iter()
            .find(|slot| &slot.descriptor == descriptor)
            .map(Slot::status)
    }

    /// Stop reconnecting, unsubscribe every live handle, and wait for the
    /// drive tasks to finish the delivery they are on.
    pub async fn shutdown(&self) {
        if !self.inner.signal_shutdown() {
            return;
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(parent: &self.inner.span, error = %e, "Subscription task panicked");
                }
            }
        }
        info!(parent: &self.inner.span, "Subscriptions stopped");
    }
}

impl Drop for SubscriptionSupervisor {
    fn drop(&mut self) {
        self.inner.signal_shutdown();
    }
}

impl std::fmt::Debug for SubscriptionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSupervisor")
            .field("catch_up", &self.inner.catch_up.read().len())
            .field("persistent", &self.inner.persistent.read().len())
            .field("is_live", &self.is_live())
            .finish()
    }
}

impl Inner {
    fn slots(&self, kind: SubscriptionKind) -> &RwLock<Vec<Slot>> {
        match kind {
            SubscriptionKind::CatchUp => &self.catch_up,
            SubscriptionKind::Persistent => &self.persistent,
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Raise the shutdown flag and unsubscribe live handles.
    /// Returns false if shutdown was already signalled.
    fn signal_shutdown(&self) -> bool {
        if self.shutdown.send_replace(true) {
            return false;
        }

        for kind in [SubscriptionKind::CatchUp, SubscriptionKind::Persistent] {
            for slot in self.slots(kind).read().iter() {
                if let Some(handle) = slot.handle.as_ref().filter(|h| h.is_live) {
                    handle.unsubscriber.unsubscribe();
                }
            }
        }
        info!(parent: &self.span, "Shutdown signalled");
        true
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn subscription_span(&self, descriptor: &SubscriptionDescriptor) -> Span {
        tracing::info_span!(
            parent: &self.span,
            "subscription",
            kind = descriptor.kind().as_str(),
            stream = %descriptor.stream(),
            group = descriptor.group().unwrap_or_default(),
        )
    }

    // =========================================================================
    // STARTUP
    // =========================================================================

    async fn start_persistent(self: &Arc<Self>) -> Result<(), BusError> {
        let expected = self.persistent.read().len();
        if expected == 0 {
            return Ok(());
        }

        let created = join_all((0..expected).map(|index| self.ensure_created(index)))
            .await
            .into_iter()
            .filter(|created| *created)
            .count();

        if created != expected {
            error!(
                parent: &self.span,
                created = created,
                expected = expected,
                "Not every persistent subscription could be created, opening none"
            );
            return Err(BusError::PersistentCountMismatch { created, expected });
        }

        join_all((0..expected).map(|index| async move {
            if self.open(SubscriptionKind::Persistent, index).await.is_err() {
                self.schedule_reconnect(index);
            }
        }))
        .await;
        Ok(())
    }

    async fn start_catch_up(self: &Arc<Self>) {
        let count = self.catch_up.read().len();
        // Failures are logged in `open`; dropped catch-up subscriptions stay dropped.
        join_all((0..count).map(|index| self.open(SubscriptionKind::CatchUp, index))).await;
    }

    async fn ensure_created(&self, index: usize) -> bool {
        let (stream, group) = {
            let mut slots = self.persistent.write();
            let Some(slot) = slots.get_mut(index) else {
                return false;
            };
            let SubscriptionDescriptor::Persistent { stream, group } = &slot.descriptor else {
                return false;
            };
            let target = (stream.clone(), group.clone());
            slot.state = SubscriptionState::Creating;
            target
        };

        let result = self
            .client
            .create_persistent_subscription(&stream, &group, &self.persistent_settings)
            .await;

        let mut slots = self.persistent.write();
        let Some(slot) = slots.get_mut(index) else {
            return false;
        };
        match result {
            Ok(()) => {
                debug!(parent: &self.span, stream = %stream, group = %group, "Created persistent subscription");
                slot.state = SubscriptionState::Created;
                slot.is_created = true;
            }
            Err(e) if e.is_already_exists() => {
                debug!(
                    parent: &self.span,
                    stream = %stream,
                    group = %group,
                    "Persistent subscription already exists, skipping creation"
                );
                slot.state = SubscriptionState::AlreadyExists;
                slot.is_created = true;
            }
            Err(e) => {
                error!(
                    parent: &self.span,
                    stream = %stream,
                    group = %group,
                    error = %e,
                    "Could not create persistent subscription"
                );
                slot.state = SubscriptionState::CreationFailed;
                slot.last_error = Some(e.to_string());
            }
        }
        slot.is_created
    }

    // =========================================================================
    // OPEN / DRIVE
    // =========================================================================

    /// Open one subscription and spawn its drive task.
    async fn open(self: &Arc<Self>, kind: SubscriptionKind, index: usize) -> Result<(), BusError> {
        let descriptor = {
            let mut slots = self.slots(kind).write();
            let Some(slot) = slots.get_mut(index) else {
                return Err(BusError::Configuration(format!("no {kind:?} subscription at {index}")));
            };
            slot.state = SubscriptionState::Subscribing;
            slot.descriptor.clone()
        };

        let result = match &descriptor {
            SubscriptionDescriptor::CatchUp { stream, from } => self
                .client
                .subscribe_to_stream(stream, *from)
                .await
                .map(Connection::CatchUp),
            SubscriptionDescriptor::Persistent { stream, group } => self
                .client
                .subscribe_to_persistent_subscription(stream, group)
                .await
                .map(Connection::Persistent),
        };

        let connection = match result {
            Ok(connection) => connection,
            Err(source) => {
                let e = BusError::Subscribe {
                    stream: descriptor.stream().to_string(),
                    source,
                };
                error!(
                    parent: &self.span,
                    stream = %descriptor.stream(),
                    group = descriptor.group().unwrap_or_default(),
                    error = %e,
                    "Could not open subscription"
                );
                if let Some(slot) = self.slots(kind).write().get_mut(index) {
                    slot.state = SubscriptionState::Dropped;
                    slot.last_error = Some(e.to_string());
                }
                return Err(e);
            }
        };

        let unsubscriber = connection.unsubscriber();
        let generation = {
            let mut slots = self.slots(kind).write();
            let Some(slot) = slots.get_mut(index) else {
                unsubscriber.unsubscribe();
                return Err(BusError::Subscribe {
                    stream: descriptor.stream().to_string(),
                    source: StoreError::Closed,
                });
            };
            if self.is_shutting_down() {
                unsubscriber.unsubscribe();
                slot.state = SubscriptionState::Stopped;
                return Ok(());
            }
            slot.generation += 1;
            slot.handle = Some(LiveHandle {
                unsubscriber,
                is_live: true,
            });
            slot.state = SubscriptionState::Live;
            slot.reconnect_attempts = 0;
            slot.last_error = None;
            slot.generation
        };
        LIVE_SUBSCRIPTIONS.with_label_values(&[kind.as_str()]).inc();

        debug!(
            parent: &self.span,
            stream = %descriptor.stream(),
            group = descriptor.group().unwrap_or_default(),
            "Subscription established"
        );

        let span = self.subscription_span(&descriptor);
        let task = tokio::spawn(
            Arc::clone(self)
                .drive(kind, index, generation, connection)
                .instrument(span),
        );
        self.track(task);
        Ok(())
    }

    async fn drive(
        self: Arc<Self>,
        kind: SubscriptionKind,
        index: usize,
        generation: u64,
        mut connection: Connection,
    ) {
        let reason = loop {
            match connection.next().await {
                Some(SubscriptionMessage::Event(resolved)) => {
                    self.deliver(kind, &connection, &resolved).await;
                }
                Some(SubscriptionMessage::CaughtUp) => {
                    debug!("Completed catch-up processing");
                }
                Some(SubscriptionMessage::Error(e)) => {
                    error!(error = %e, "Subscription error");
                    break Some(e.to_string());
                }
                None => break None,
            }
        };
        drop(connection);

        if self.mark_dropped(kind, index, generation, reason) {
            self.schedule_reconnect(index);
        }
    }

    async fn deliver(&self, kind: SubscriptionKind, connection: &Connection, resolved: &ResolvedEvent) {
        let result = self.dispatcher.dispatch(resolved).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        EVENTS_RECEIVED
            .with_label_values(&[kind.as_str(), outcome])
            .inc();

        let event_id = resolved.original_id();
        let sub = match connection {
            Connection::CatchUp(_) => {
                if let Err(e) = result {
                    error!(event_id = ?event_id, error = %e, "Delivery failed, event dropped");
                }
                return;
            }
            Connection::Persistent(sub) => sub,
        };

        let Some(event_id) = event_id else {
            error!("Delivery carries no event id, cannot acknowledge");
            return;
        };

        match result {
            Ok(_) => match sub.ack(event_id) {
                Ok(()) => EVENTS_ACKED
                    .with_label_values(&[sub.stream(), sub.group()])
                    .inc(),
                Err(e) => warn!(event_id = %event_id, error = %e, "Ack not sent"),
            },
            Err(e) => {
                error!(
                    event_id = %event_id,
                    action = self.nack_action.as_str(),
                    error = %e,
                    "Delivery failed, sending nack"
                );
                match sub.nack(self.nack_action, e.to_string(), event_id) {
                    Ok(()) => EVENTS_NACKED
                        .with_label_values(&[sub.stream(), sub.group(), self.nack_action.as_str()])
                        .inc(),
                    Err(e) => warn!(event_id = %event_id, error = %e, "Nack not sent"),
                }
            }
        }
    }

    /// Synchronous drop transition. Returns true when a reconnect is due.
    fn mark_dropped(
        &self,
        kind: SubscriptionKind,
        index: usize,
        generation: u64,
        reason: Option<String>,
    ) -> bool {
        let shutting_down = self.is_shutting_down();
        let mut slots = self.slots(kind).write();
        let Some(slot) = slots.get_mut(index) else {
            return false;
        };
        if slot.generation != generation {
            return false;
        }

        if let Some(handle) = slot.handle.as_mut() {
            if handle.is_live {
                handle.is_live = false;
                LIVE_SUBSCRIPTIONS.with_label_values(&[kind.as_str()]).dec();
            }
        }

        if shutting_down {
            slot.state = SubscriptionState::Stopped;
            return false;
        }

        slot.state = SubscriptionState::Dropped;
        if reason.is_some() {
            slot.last_error = reason;
        }
        warn!("Subscription dropped");
        kind == SubscriptionKind::Persistent
    }

    // =========================================================================
    // RECONNECT
    // =========================================================================

    fn schedule_reconnect(self: &Arc<Self>, index: usize) {
        let Some(descriptor) = self
            .persistent
            .read()
            .get(index)
            .map(|slot| slot.descriptor.clone())
        else {
            return;
        };

        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let span = self.subscription_span(&descriptor);

        let task = tokio::spawn(
            async move {
                loop {
                    if inner.is_shutting_down() {
                        return;
                    }

                    let attempt = {
                        let mut slots = inner.persistent.write();
                        let Some(slot) = slots.get_mut(index) else {
                            return;
                        };
                        slot.reconnect_attempts += 1;
                        slot.reconnect_attempts
                    };
                    if let Some(max) = inner.max_reconnect_attempts {
                        if attempt > max {
                            error!(attempts = max, "Giving up reconnecting to persistent subscription");
                            return;
                        }
                    }

                    warn!(
                        delay = ?inner.reconnect_delay,
                        attempt = attempt,
                        "Reconnecting to persistent subscription"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(inner.reconnect_delay) => {}
                        _ = shutdown.changed() => return,
                    }
                    if inner.is_shutting_down() {
                        return;
                    }

                    RECONNECT_ATTEMPTS
                        .with_label_values(&[descriptor.stream(), descriptor.group().unwrap_or_default()])
                        .inc();
                    if inner.open(SubscriptionKind::Persistent, index).await.is_ok() {
                        return;
                    }
                }
            }
            .instrument(span),
        );
        self.track(task);
    }
}
