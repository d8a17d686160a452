//! Wall-clock sources for countdown deadlines.
//!
//! Deadlines travel between peers as absolute Unix epoch milliseconds, so
//! every clock here reports epoch time rather than a process-local instant.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Epoch clock that advances with the tokio time driver.
///
/// Anchored to wall time once, then driven by `tokio::time::Instant`, so a
/// paused test runtime moves it in lockstep with timers.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    wall_base: i64,
    instant_base: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self::anchored_at(SystemClock.now_millis())
    }

    pub fn anchored_at(wall_millis: i64) -> Self {
        Self {
            wall_base: wall_millis,
            instant_base: tokio::time::Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now_millis(&self) -> i64 {
        self.wall_base + self.instant_base.elapsed().as_millis() as i64
    }
}
