//! The shared call state coordinator.
//!
//! One [`CallStateCoordinator`] is created at application start and handed to
//! every call-handling observer by cloning the handle. All clones share the
//! same state.
//!
//! Every mutation goes through [`CallStateCoordinator::commit`], which stores
//! the new state, bumps the revision, publishes to the watch channel and
//! queues the listener delivery while the lock is held. The queue is drained
//! in revision order by one thread at a time with the lock released, so a
//! listener never sees an older state after a newer one and may call back
//! into the coordinator.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use callgate_types::{
    CallEvent, CallLifecycle, CallPhase, CallState, CallStatePatch, CallTransitionError,
    CoordinatorSettings,
};

use crate::guard::{BeginCallError, BeginHangupError, InitiationGuard, TeardownGuard};

type Listener = Arc<dyn Fn(&CallState) + Send + Sync>;

/// A state update as seen on the watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    pub revision: u64,
    pub state: CallState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    state: CallState,
    revision: u64,
    /// Bumped whenever a processing window opens or is forcibly closed.
    epoch: u64,
    processing_since: Option<Instant>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
    pending: VecDeque<Delivery>,
    /// Revision of the last update handed to every listener.
    delivered: u64,
    /// Thread currently draining `pending`.
    delivering: Option<ThreadId>,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    delivery_done: Condvar,
    changes: watch::Sender<StateChange>,
    settings: CoordinatorSettings,
}

/// Listener calls queued for one committed revision.
struct Delivery {
    revision: u64,
    state: CallState,
    listeners: Vec<Listener>,
}

#[derive(Clone)]
pub struct CallStateCoordinator {
    shared: Arc<Shared>,
}

impl fmt::Debug for CallStateCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CallStateCoordinator")
            .field("state", &inner.state)
            .field("revision", &inner.revision)
            .field("listeners", &inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Default for CallStateCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorSettings::default())
    }
}

impl CallStateCoordinator {
    #[must_use]
    pub fn new(settings: CoordinatorSettings) -> Self {
        let (changes, _rx) = watch::channel(StateChange::default());
        let inner = Inner {
            state: CallState::default(),
            revision: 0,
            epoch: 0,
            processing_since: None,
            listeners: Vec::new(),
            next_subscription: 0,
            pending: VecDeque::new(),
            delivered: 0,
            delivering: None,
        };
        tracing::debug!(
            incoming_policy = %settings.incoming_policy(),
            "Call state coordinator created"
        );
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                delivery_done: Condvar::new(),
                changes,
                settings,
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.shared.settings
    }

    /// Owned snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    #[must_use]
    pub fn phase(&self) -> CallPhase {
        self.lock().state.phase()
    }

    /// Admission gate. Advisory only: between this check and a following
    /// `set_processing(true)` another thread may get in. Prefer
    /// [`Self::try_begin_call`] when callers are not on one thread.
    #[must_use]
    pub fn can_initiate_call(&self) -> bool {
        self.lock().state.can_initiate_call()
    }

    /// Shallow-merge `patch` into the state and notify every subscriber.
    ///
    /// Returns once every listener has seen this update, unless called from
    /// inside a listener, in which case the update is delivered after the
    /// current one.
    pub fn set_state(&self, patch: CallStatePatch) -> CallState {
        let mut inner = self.lock();
        let next = inner.state.clone().merged(patch);
        let (revision, state) = self.commit(&mut inner, next);
        self.flush(inner, revision);
        state
    }

    pub fn set_processing(&self, processing: bool) -> CallState {
        self.set_state(CallStatePatch::new().processing(processing))
    }

    /// Register `listener` for every later update. Dropping the returned
    /// [`Subscription`] (or calling [`Subscription::unsubscribe`]) removes it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CallState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner.listeners.push((id, Arc::new(listener)));
        tracing::trace!(subscription = id.0, "Listener subscribed");
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
            attached: true,
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Receiver for async observers. Always holds the latest update.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StateChange> {
        self.shared.changes.subscribe()
    }

    /// Drive the lifecycle by one event under the configured incoming policy.
    /// A rejected event leaves the state untouched.
    pub fn apply(&self, event: CallEvent) -> Result<CallState, CallTransitionError> {
        let mut inner = self.lock();
        let current = CallLifecycle::from(inner.state.clone());
        let from = current.phase();
        let name = event.name();
        match current.apply(event, self.shared.settings.incoming_policy()) {
            Ok(next) => {
                tracing::info!(%from, to = %next.phase(), event = name, "Call transition");
                let (revision, state) = self.commit(&mut inner, next.into());
                self.flush(inner, revision);
                Ok(state)
            }
            Err((_unchanged, err)) => {
                tracing::warn!(%from, event = name, "Rejected call transition: {err}");
                Err(err)
            }
        }
    }

    /// Check the gate and raise the processing flag in one step.
    pub fn try_begin_call(&self) -> Result<InitiationGuard, BeginCallError> {
        let mut inner = self.lock();
        if inner.state.is_processing {
            return Err(BeginCallError::AlreadyProcessing);
        }
        if inner.state.active_call.is_some() {
            return Err(BeginCallError::CallActive);
        }
        let next = inner
            .state
            .clone()
            .merged(CallStatePatch::new().processing(true));
        let (revision, _) = self.commit(&mut inner, next);
        let epoch = inner.epoch;
        tracing::info!(epoch, "Call initiation admitted");
        self.flush(inner, revision);
        Ok(InitiationGuard::new(self.clone(), epoch))
    }

    /// Move the active call into teardown in one step.
    pub fn try_begin_hangup(&self) -> Result<TeardownGuard, BeginHangupError> {
        let mut inner = self.lock();
        if inner.state.is_processing {
            return Err(BeginHangupError::AlreadyProcessing);
        }
        if inner.state.active_call.is_none() {
            return Err(BeginHangupError::NoActiveCall);
        }
        let next = inner
            .state
            .clone()
            .merged(CallStatePatch::new().processing(true));
        let (revision, _) = self.commit(&mut inner, next);
        let epoch = inner.epoch;
        tracing::info!(epoch, "Call teardown started");
        self.flush(inner, revision);
        Ok(TeardownGuard::new(self.clone(), epoch))
    }

    /// Close the processing window opened at `epoch` by applying `event`.
    ///
    /// If the window was already closed or reopened by someone else, nothing
    /// changes and `Stale` is returned. If the event is not legal from the
    /// current phase, the processing flag is still lowered so the gate cannot
    /// stay stuck.
    pub(crate) fn resolve(
        &self,
        epoch: u64,
        event: CallEvent,
    ) -> Result<CallState, CallTransitionError> {
        let name = event.name();
        let mut inner = self.lock();
        if inner.epoch != epoch || !inner.state.is_processing {
            tracing::debug!(
                epoch,
                current = inner.epoch,
                event = name,
                "Stale resolution ignored"
            );
            return Err(CallTransitionError::Stale { event: name });
        }

        let current = CallLifecycle::from(inner.state.clone());
        let from = current.phase();
        let (next, outcome) = match current.apply(event, self.shared.settings.incoming_policy()) {
            Ok(next) => {
                tracing::info!(%from, to = %next.phase(), event = name, "Call transition");
                (CallState::from(next), Ok(()))
            }
            Err((unchanged, err)) => {
                tracing::warn!(
                    %from,
                    event = name,
                    "Releasing processing after rejected transition: {err}"
                );
                let released =
                    CallState::from(unchanged).merged(CallStatePatch::new().processing(false));
                (released, Err(err))
            }
        };
        let (revision, state) = self.commit(&mut inner, next);
        self.flush(inner, revision);
        outcome.map(|()| state)
    }

    /// Lower the processing flag if it has been raised for at least `max_age`.
    /// Any guard holding the expired window becomes stale.
    pub fn expire_stale_processing(&self, max_age: Duration) -> bool {
        let mut inner = self.lock();
        let Some(since) = inner.processing_since else {
            return false;
        };
        let held = since.elapsed();
        if held < max_age {
            return false;
        }
        tracing::warn!(
            held_ms = held.as_millis(),
            epoch = inner.epoch,
            "Processing flag held too long, resetting"
        );
        inner.epoch = inner.epoch.wrapping_add(1);
        let next = inner
            .state
            .clone()
            .merged(CallStatePatch::new().processing(false));
        let (revision, _) = self.commit(&mut inner, next);
        self.flush(inner, revision);
        true
    }

    pub(crate) fn downgrade(&self) -> WeakCoordinator {
        WeakCoordinator(Arc::downgrade(&self.shared))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every write leaves `Inner` consistent before any listener runs, so a
        // panic elsewhere never exposes a half-applied update.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, inner: &mut Inner, next: CallState) -> (u64, CallState) {
        if next.is_processing && !inner.state.is_processing {
            inner.epoch = inner.epoch.wrapping_add(1);
            inner.processing_since = Some(Instant::now());
        } else if !next.is_processing {
            inner.processing_since = None;
        }
        inner.state = next;
        inner.revision = inner.revision.wrapping_add(1);

        self.shared.changes.send_replace(StateChange {
            revision: inner.revision,
            state: inner.state.clone(),
        });
        tracing::debug!(
            revision = inner.revision,
            phase = %inner.state.phase(),
            processing = inner.state.is_processing,
            "Call state updated"
        );

        let listeners = inner
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        inner.pending.push_back(Delivery {
            revision: inner.revision,
            state: inner.state.clone(),
            listeners,
        });
        (inner.revision, inner.state.clone())
    }

    /// Drain queued deliveries in revision order, then release `inner`.
    ///
    /// One thread drains at a time. Re-entry from a listener returns at once;
    /// the outer drain delivers the nested update next. Any other thread
    /// waits until `revision` has been delivered, or takes over the queue
    /// once it is free.
    fn flush(&self, mut inner: MutexGuard<'_, Inner>, revision: u64) {
        let me = thread::current().id();
        loop {
            if inner.delivered >= revision {
                return;
            }
            match inner.delivering {
                Some(owner) if owner == me => return,
                Some(_) => {
                    inner = self
                        .shared
                        .delivery_done
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => break,
            }
        }
        inner.delivering = Some(me);
        drop(inner);

        let _claim = DeliveryClaim(self);
        loop {
            let Some(delivery) = self.lock().pending.pop_front() else {
                break;
            };
            for listener in &delivery.listeners {
                listener(&delivery.state);
            }
            self.lock().delivered = delivery.revision;
            self.shared.delivery_done.notify_all();
        }
    }
}

/// Releases the delivery queue, also when a listener panics.
struct DeliveryClaim<'a>(&'a CallStateCoordinator);

impl Drop for DeliveryClaim<'_> {
    fn drop(&mut self) {
        self.0.lock().delivering = None;
        self.0.shared.delivery_done.notify_all();
    }
}

pub(crate) struct WeakCoordinator(Weak<Shared>);

impl WeakCoordinator {
    pub(crate) fn upgrade(&self) -> Option<CallStateCoordinator> {
        self.0.upgrade().map(|shared| CallStateCoordinator { shared })
    }
}

/// Registration handle returned by [`CallStateCoordinator::subscribe`].
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: SubscriptionId,
    attached: bool,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for the coordinator's whole lifetime.
    pub fn detach(mut self) {
        self.attached = false;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.attached)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner.listeners.retain(|(id, _)| *id != self.id);
        tracing::trace!(subscription = self.id.0, "Listener unsubscribed");
    }
}
