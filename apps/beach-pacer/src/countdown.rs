//! Periodic countdown re-evaluation.
//!
//! The countdown itself is an absolute deadline in the session state; this
//! module only provides the tick that makes displays refresh and that notices
//! expiry. At most one tick task is alive per timer.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub use pacer_proto::model::remaining_seconds;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

pub struct CountdownTimer {
    period: Duration,
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl CountdownTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period: if period.is_zero() {
                DEFAULT_TICK_INTERVAL
            } else {
                period
            },
            slot: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Replaces any running tick task with a new one calling `on_tick` every
    /// period, starting one period from now, until it returns [`Tick::Stop`].
    pub fn start<F>(&self, runtime: &Handle, mut on_tick: F)
    where
        F: FnMut() -> Tick + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let period = self.period;
        let first = Instant::now() + period;
        *slot = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if on_tick() == Tick::Stop {
                    break;
                }
            }
        }));
    }

    /// Cancels the tick task. Safe to call repeatedly or before any start.
    pub fn stop(&self) -> bool {
        match self.slot.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
