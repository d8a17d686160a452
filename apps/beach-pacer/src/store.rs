//! Per-client replica of the pacer session.
//!
//! Local mutators change the replica, announce the change through the
//! [`Outbox`] and, on the leader, persist it. The `apply_remote_*` mirrors are
//! what the sync worker calls for inbound messages: same transition, never
//! re-announced, so one inbound message yields zero outbound ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use pacer_proto::{
    PacerMessage, ParticipantStatus, SessionSignal, SessionSnapshot, SessionState, SignalChange,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, MIN_DEFAULT_COUNTDOWN_SECS};
use crate::countdown::{remaining_seconds, CountdownTimer, Tick, DEFAULT_TICK_INTERVAL};
use crate::error::{PacerError, PacerResult};
use crate::notify::{self, Listener, SharedRegistry, Subscription};
use crate::persistence::{PersistWriter, SnapshotStore};
use crate::role::LeaderRole;

/// Where outbound changes go. Implementations must not block or call back
/// into the store; `emit` runs under the store's state lock so outbound order
/// matches the order of local transitions. Delivery is fire-and-forget.
pub trait Outbox: Send + Sync {
    fn emit(&self, message: PacerMessage);
}

/// Outbox for replicas that never talk to peers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutbox;

impl Outbox for NullOutbox {
    fn emit(&self, _message: PacerMessage) {}
}

#[derive(Clone)]
pub struct StoreConfig {
    pub clock: Arc<dyn Clock>,
    pub persistence: Option<Arc<dyn SnapshotStore>>,
    pub tick_interval: Duration,
    pub default_countdown_secs: u64,
}

impl StoreConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval,
            default_countdown_secs: config.default_countdown_secs,
            ..Self::default()
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_persistence(mut self, persistence: Option<Arc<dyn SnapshotStore>>) -> Self {
        self.persistence = persistence;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            persistence: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            default_countdown_secs: MIN_DEFAULT_COUNTDOWN_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
}

#[derive(Clone)]
pub struct PacerStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<SessionState>,
    listeners: SharedRegistry,
    notify_pending: AtomicBool,
    closed: AtomicBool,
    timer: CountdownTimer,
    role: Arc<dyn LeaderRole>,
    outbox: Arc<dyn Outbox>,
    persistence: Option<Arc<dyn SnapshotStore>>,
    writer: Option<PersistWriter>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    default_countdown_secs: u64,
}

impl PacerStore {
    /// Builds an empty replica. Must be called from within a tokio runtime;
    /// notifications, the countdown tick and persistence run on it.
    pub fn new(
        role: Arc<dyn LeaderRole>,
        outbox: Arc<dyn Outbox>,
        config: StoreConfig,
    ) -> PacerResult<Self> {
        let runtime = Handle::try_current().map_err(|_| PacerError::NoRuntime)?;
        let writer = config
            .persistence
            .as_ref()
            .map(|store| PersistWriter::spawn(&runtime, Arc::clone(store)));
        Ok(Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(SessionState::default()),
                listeners: SharedRegistry::default(),
                notify_pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                timer: CountdownTimer::new(config.tick_interval),
                role,
                outbox,
                persistence: config.persistence,
                writer,
                clock: config.clock,
                runtime,
                default_countdown_secs: config.default_countdown_secs,
            }),
        })
    }

    // --- reads ---

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.inner.clock.now_millis();
        self.inner.state.lock().snapshot_at(now)
    }

    pub fn participant_status(&self, participant_id: &str) -> ParticipantStatus {
        self.inner.state.lock().status_of(participant_id)
    }

    pub fn is_leader(&self) -> bool {
        self.inner.role.is_leader()
    }

    pub fn countdown_running(&self) -> bool {
        self.inner.timer.is_running()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    // --- participant status ---

    /// Sets `participant_id`'s status and announces it. Callers are expected
    /// to pass only their own id.
    pub fn set_own_status(&self, participant_id: impl Into<String>, status: ParticipantStatus) {
        self.update_status(participant_id.into(), status, Origin::Local);
    }

    pub fn apply_remote_status(&self, participant_id: impl Into<String>, status: ParticipantStatus) {
        self.update_status(participant_id.into(), status, Origin::Remote);
    }

    fn update_status(&self, participant_id: String, status: ParticipantStatus, origin: Origin) {
        debug!(
            target = "pacer.store",
            participant_id = %participant_id,
            status = ?status,
            origin = ?origin,
            "participant status updated"
        );
        {
            let mut state = self.inner.state.lock();
            state
                .participant_status
                .insert(participant_id.clone(), status);
            if origin == Origin::Local && !self.is_closed() {
                self.inner.outbox.emit(PacerMessage::StatusChanged {
                    participant_id,
                    status,
                });
            }
        }
        self.after_mutation();
    }

    // --- leader signals ---

    pub fn activate_soft_signal(&self) -> bool {
        self.transition(SignalChange::Soft, Origin::Local)
    }

    /// Starts a countdown of `seconds`; zero uses the configured default.
    pub fn start_countdown(&self, seconds: u64) -> bool {
        let seconds = if seconds == 0 {
            self.inner.default_countdown_secs
        } else {
            seconds
        };
        let duration_ms = i64::try_from(seconds.saturating_mul(1_000)).unwrap_or(i64::MAX);
        let deadline = self.inner.clock.now_millis().saturating_add(duration_ms);
        self.transition(SignalChange::Countdown { deadline }, Origin::Local)
    }

    pub fn start_default_countdown(&self) -> bool {
        self.start_countdown(self.inner.default_countdown_secs)
    }

    pub fn open_floor(&self) -> bool {
        self.transition(SignalChange::FloorOpen, Origin::Local)
    }

    pub fn cancel_signal(&self) -> bool {
        self.transition(SignalChange::Cancel, Origin::Local)
    }

    pub fn reset_all(&self) -> bool {
        self.transition(SignalChange::Reset, Origin::Local)
    }

    pub fn apply_remote_soft_signal(&self) {
        self.transition(SignalChange::Soft, Origin::Remote);
    }

    pub fn apply_remote_countdown(&self, deadline: i64) {
        self.transition(SignalChange::Countdown { deadline }, Origin::Remote);
    }

    pub fn apply_remote_floor_open(&self) {
        self.transition(SignalChange::FloorOpen, Origin::Remote);
    }

    pub fn apply_remote_cancel(&self) {
        self.transition(SignalChange::Cancel, Origin::Remote);
    }

    pub fn apply_remote_reset(&self) {
        self.transition(SignalChange::Reset, Origin::Remote);
    }

    /// Leader-only actions from this client pass; remote mirrors always pass.
    fn authorize(&self, origin: Origin) -> bool {
        match origin {
            Origin::Remote => true,
            Origin::Local => self.is_leader(),
        }
    }

    fn transition(&self, change: SignalChange, origin: Origin) -> bool {
        self.transition_if(change, origin, |_| true)
    }

    /// Applies `change` only while `guard` holds for the current state. The
    /// check, the state update, the timer swap and the emit share one lock
    /// acquisition, so transitions never interleave.
    fn transition_if<G>(&self, change: SignalChange, origin: Origin, guard: G) -> bool
    where
        G: FnOnce(&SessionState) -> bool,
    {
        if !self.authorize(origin) {
            debug!(
                target = "pacer.store",
                signal = ?change.signal(),
                "ignoring leader-only action from non-leader"
            );
            return false;
        }

        {
            let mut state = self.inner.state.lock();
            if !guard(&state) {
                return false;
            }
            change.apply(&mut state);
            self.inner.timer.stop();
            // A closed store keeps its memory current but goes quiet.
            if !self.is_closed() {
                if let SignalChange::Countdown { deadline } = change {
                    self.start_timer(deadline);
                }
                if origin == Origin::Local {
                    self.inner.outbox.emit(PacerMessage::for_signal(change));
                }
            }
        }

        info!(
            target = "pacer.store",
            signal = ?change.signal(),
            origin = ?origin,
            "session signal changed"
        );
        self.after_mutation();
        true
    }

    // --- recovery ---

    /// Replaces the whole replica with a leader snapshot.
    pub fn apply_remote_snapshot(&self, state: SessionState) {
        self.replace_state(state.normalized());
        debug!(target = "pacer.store", "applied session snapshot");
        self.after_mutation();
    }

    /// Seeds the leader's replica from persistence. Non-leaders, missing
    /// records and load failures all leave the replica as it is.
    pub async fn restore(&self) -> bool {
        if !self.is_leader() {
            return false;
        }
        let Some(store) = self.inner.persistence.clone() else {
            return false;
        };
        let saved = match store.load().await {
            Ok(Some(saved)) => saved,
            Ok(None) => return false,
            Err(err) => {
                warn!(
                    target = "pacer.persist",
                    error = %err,
                    "failed to load persisted session state; starting empty"
                );
                return false;
            }
        };

        let mut state = saved.normalized();
        if state.expire_elapsed_countdown(self.inner.clock.now_millis()) {
            info!(
                target = "pacer.persist",
                "persisted countdown expired while offline"
            );
        }
        info!(
            target = "pacer.persist",
            signal = ?state.signal,
            participants = state.participant_status.len(),
            "restored session state"
        );
        self.replace_state(state);
        self.after_mutation();
        true
    }

    fn replace_state(&self, state: SessionState) {
        let mut current = self.inner.state.lock();
        *current = state;
        self.inner.timer.stop();
        if let (SessionSignal::Countdown, Some(deadline)) =
            (current.signal, current.countdown_deadline)
        {
            if !self.is_closed() {
                self.start_timer(deadline);
            }
        }
    }

    // --- countdown ---

    /// Spawns the tick task for the countdown ending at `deadline`. Callers
    /// hold the state lock, which is what serialises timer swaps.
    fn start_timer(&self, deadline: i64) {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        self.inner
            .timer
            .start(&self.inner.runtime, move || match weak.upgrade() {
                Some(inner) => PacerStore { inner }.countdown_tick(deadline),
                None => Tick::Stop,
            });
    }

    /// Tick for the countdown ending at `deadline`. A tick whose countdown
    /// has since been replaced or cleared stops without touching the state.
    fn countdown_tick(&self, deadline: i64) -> Tick {
        let now = self.inner.clock.now_millis();
        let remaining = {
            let state = self.inner.state.lock();
            if !owns_countdown(&state, deadline) {
                return Tick::Stop;
            }
            remaining_seconds(deadline, now)
        };
        self.schedule_notify();
        if remaining > 0 {
            return Tick::Continue;
        }

        if !self.is_leader() {
            debug!(
                target = "pacer.countdown",
                "countdown expired; waiting for leader to cancel"
            );
            return Tick::Stop;
        }
        let cancelled = self.transition_if(SignalChange::Cancel, Origin::Local, |state| {
            owns_countdown(state, deadline)
        });
        if cancelled {
            debug!(target = "pacer.countdown", "countdown expired; signal cancelled");
        } else {
            debug!(
                target = "pacer.countdown",
                "countdown superseded before expiry was applied"
            );
        }
        Tick::Stop
    }

    // --- notifications ---

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        notify::register(&self.inner.listeners, listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn after_mutation(&self) {
        self.schedule_notify();
        self.persist_if_leader();
    }

    /// Coalesces notifications: the first change in a scheduler turn spawns a
    /// delivery, later ones in the same turn ride along with it.
    fn schedule_notify(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        if self.inner.notify_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::task::yield_now().await;
            if let Some(inner) = weak.upgrade() {
                PacerStore { inner }.deliver_notifications();
            }
        });
    }

    fn deliver_notifications(&self) {
        // Cleared before reading so a concurrent change schedules its own run.
        self.inner.notify_pending.store(false, Ordering::Release);
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let listeners = self.inner.listeners.lock().listeners();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        notify::deliver(&listeners, &snapshot);
    }

    fn persist_if_leader(&self) {
        let Some(writer) = self.inner.writer.as_ref() else {
            return;
        };
        if !self.is_leader() {
            return;
        }
        let state = self.inner.state.lock().clone();
        writer.submit(state);
    }

    /// Stops the countdown tick, drops listeners and persistence. Idempotent.
    pub fn close(&self) {
        {
            // Under the state lock so no transition can restart the timer
            // between the flag flip and the stop.
            let _state = self.inner.state.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.inner.timer.stop();
        }
        self.inner.listeners.lock().clear();
        if let Some(writer) = self.inner.writer.as_ref() {
            writer.close();
        }
        debug!(target = "pacer.store", "pacer store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

fn owns_countdown(state: &SessionState, deadline: i64) -> bool {
    state.signal == SessionSignal::Countdown && state.countdown_deadline == Some(deadline)
}
