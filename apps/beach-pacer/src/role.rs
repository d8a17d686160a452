//! Leader identity as seen by the core.
//!
//! Elections and role assignment live outside this crate; the store only asks
//! "is this client the leader right now" and asks it on every gated call.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait LeaderRole: Send + Sync {
    fn is_leader(&self) -> bool;
}

impl<F> LeaderRole for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_leader(&self) -> bool {
        (self)()
    }
}

/// Settable role flag for hosts that learn their role at runtime.
#[derive(Debug, Default)]
pub struct LeaderFlag(AtomicBool);

impl LeaderFlag {
    pub fn new(is_leader: bool) -> Self {
        Self(AtomicBool::new(is_leader))
    }

    pub fn set(&self, is_leader: bool) {
        self.0.store(is_leader, Ordering::Release);
    }
}

impl LeaderRole for LeaderFlag {
    fn is_leader(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn flag_can_be_flipped() {
        let flag = LeaderFlag::new(false);
        assert!(!flag.is_leader());
        flag.set(true);
        assert!(flag.is_leader());
    }

    #[test_timeout::timeout]
    fn closures_act_as_roles() {
        let role = || true;
        assert!(LeaderRole::is_leader(&role));
    }
}
