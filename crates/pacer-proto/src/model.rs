use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A participant's self-reported state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Engaged,
    HandRaised,
    NeedTime,
    Ready,
}

/// Session-wide signal owned by the leader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSignal {
    #[default]
    None,
    Soft,
    Countdown,
    FloorOpen,
}

/// Stored session aggregate. This is both the persisted record and the
/// `state` carried by a snapshot reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Only participants that deviate from `Engaged` need an entry.
    #[serde(default)]
    pub participant_status: BTreeMap<String, ParticipantStatus>,
    #[serde(default)]
    pub signal: SessionSignal,
    /// Absolute deadline in Unix epoch milliseconds, set iff `signal == Countdown`.
    #[serde(default)]
    pub countdown_deadline: Option<i64>,
}

impl SessionState {
    pub fn status_of(&self, participant_id: &str) -> ParticipantStatus {
        self.participant_status
            .get(participant_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn hand_raised_count(&self) -> usize {
        self.participant_status
            .values()
            .filter(|status| **status == ParticipantStatus::HandRaised)
            .count()
    }

    /// Restores `countdown_deadline.is_some() == (signal == Countdown)` on
    /// records decoded from the wire or from storage.
    pub fn normalized(mut self) -> Self {
        match (self.signal, self.countdown_deadline) {
            (SessionSignal::Countdown, None) => self.signal = SessionSignal::None,
            (SessionSignal::Countdown, Some(_)) => {}
            (_, Some(_)) => self.countdown_deadline = None,
            (_, None) => {}
        }
        self
    }

    /// Drops a countdown whose deadline is already behind `now_ms`.
    /// Returns true when the state changed.
    pub fn expire_elapsed_countdown(&mut self, now_ms: i64) -> bool {
        match self.countdown_deadline {
            Some(deadline) if self.signal == SessionSignal::Countdown && deadline <= now_ms => {
                self.signal = SessionSignal::None;
                self.countdown_deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn remaining_seconds(&self, now_ms: i64) -> Option<u64> {
        match (self.signal, self.countdown_deadline) {
            (SessionSignal::Countdown, Some(deadline)) => Some(remaining_seconds(deadline, now_ms)),
            _ => None,
        }
    }

    pub fn snapshot_at(&self, now_ms: i64) -> SessionSnapshot {
        SessionSnapshot {
            participant_status: self.participant_status.clone(),
            signal: self.signal,
            countdown_deadline: self.countdown_deadline,
            remaining_seconds: self.remaining_seconds(now_ms),
            hand_raised_count: self.hand_raised_count(),
        }
    }
}

/// Whole seconds left until `deadline_ms`, rounded up and floored at zero.
pub fn remaining_seconds(deadline_ms: i64, now_ms: i64) -> u64 {
    let left = deadline_ms.saturating_sub(now_ms);
    if left <= 0 {
        return 0;
    }
    // ceil without overflowing near i64::MAX
    ((left - 1) / 1000 + 1) as u64
}

/// Immutable point-in-time view handed to readers and listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub participant_status: BTreeMap<String, ParticipantStatus>,
    pub signal: SessionSignal,
    pub countdown_deadline: Option<i64>,
    pub remaining_seconds: Option<u64>,
    pub hand_raised_count: usize,
}

impl SessionSnapshot {
    pub fn status_of(&self, participant_id: &str) -> ParticipantStatus {
        self.participant_status
            .get(participant_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            participant_status: self.participant_status.clone(),
            signal: self.signal,
            countdown_deadline: self.countdown_deadline,
        }
    }
}

/// Leader-driven transition of the session signal.
///
/// Any change replaces the current signal outright; there is no queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalChange {
    Soft,
    Countdown { deadline: i64 },
    FloorOpen,
    Cancel,
    /// Clears every participant status as well as the signal.
    Reset,
}

impl SignalChange {
    pub fn apply(self, state: &mut SessionState) {
        let (signal, deadline) = match self {
            SignalChange::Soft => (SessionSignal::Soft, None),
            SignalChange::Countdown { deadline } => (SessionSignal::Countdown, Some(deadline)),
            SignalChange::FloorOpen => (SessionSignal::FloorOpen, None),
            SignalChange::Cancel => (SessionSignal::None, None),
            SignalChange::Reset => {
                state.participant_status.clear();
                (SessionSignal::None, None)
            }
        };
        state.signal = signal;
        state.countdown_deadline = deadline;
    }

    pub fn signal(self) -> SessionSignal {
        match self {
            SignalChange::Soft => SessionSignal::Soft,
            SignalChange::Countdown { .. } => SessionSignal::Countdown,
            SignalChange::FloorOpen => SessionSignal::FloorOpen,
            SignalChange::Cancel | SignalChange::Reset => SessionSignal::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_participant_defaults_to_engaged() {
        let state = SessionState::default();
        assert_eq!(state.status_of("nobody"), ParticipantStatus::Engaged);
    }

    #[test]
    fn remaining_rounds_up_and_floors_at_zero() {
        assert_eq!(remaining_seconds(120_000, 0), 120);
        assert_eq!(remaining_seconds(120_000, 1_000), 119);
        assert_eq!(remaining_seconds(120_000, 1_001), 119);
        assert_eq!(remaining_seconds(120_000, 119_999), 1);
        assert_eq!(remaining_seconds(120_000, 120_000), 0);
        assert_eq!(remaining_seconds(120_000, 500_000), 0);
    }

    #[test]
    fn far_deadlines_do_not_overflow() {
        assert_eq!(remaining_seconds(i64::MAX, 0), 9_223_372_036_854_776);
        assert_eq!(remaining_seconds(i64::MAX, -5), 9_223_372_036_854_776);
        assert_eq!(remaining_seconds(i64::MIN, i64::MAX), 0);

        let mut state = SessionState::default();
        SignalChange::Countdown { deadline: i64::MAX }.apply(&mut state);
        assert_eq!(
            state.snapshot_at(0).remaining_seconds,
            Some(9_223_372_036_854_776)
        );
    }

    #[test]
    fn normalized_enforces_deadline_invariant() {
        let dangling = SessionState {
            signal: SessionSignal::Countdown,
            countdown_deadline: None,
            ..Default::default()
        }
        .normalized();
        assert_eq!(dangling.signal, SessionSignal::None);

        let stray = SessionState {
            signal: SessionSignal::Soft,
            countdown_deadline: Some(10),
            ..Default::default()
        }
        .normalized();
        assert_eq!(stray.signal, SessionSignal::Soft);
        assert_eq!(stray.countdown_deadline, None);
    }

    #[test]
    fn elapsed_countdown_expires() {
        let mut state = SessionState::default();
        SignalChange::Countdown { deadline: 5_000 }.apply(&mut state);
        assert!(!state.expire_elapsed_countdown(4_999));
        assert!(state.expire_elapsed_countdown(5_000));
        assert_eq!(state.signal, SessionSignal::None);
        assert_eq!(state.countdown_deadline, None);
    }

    #[test]
    fn reset_clears_statuses_and_signal() {
        let mut state = SessionState::default();
        state
            .participant_status
            .insert("p1".into(), ParticipantStatus::HandRaised);
        SignalChange::Countdown { deadline: 1 }.apply(&mut state);
        SignalChange::Reset.apply(&mut state);
        assert!(state.participant_status.is_empty());
        assert_eq!(state.signal, SessionSignal::None);
        assert_eq!(state.countdown_deadline, None);
    }

    #[test]
    fn snapshot_derives_counts_and_remaining() {
        let mut state = SessionState::default();
        state
            .participant_status
            .insert("p1".into(), ParticipantStatus::HandRaised);
        state
            .participant_status
            .insert("p2".into(), ParticipantStatus::Ready);
        SignalChange::Countdown { deadline: 60_000 }.apply(&mut state);

        let snapshot = state.snapshot_at(30_500);
        assert_eq!(snapshot.hand_raised_count, 1);
        assert_eq!(snapshot.remaining_seconds, Some(30));
        assert_eq!(snapshot.state(), state);

        SignalChange::FloorOpen.apply(&mut state);
        assert_eq!(state.snapshot_at(0).remaining_seconds, None);
    }

    #[test]
    fn decodes_partial_records() {
        let state: SessionState =
            serde_json::from_str(r#"{"signal":"floor_open"}"#).expect("partial record");
        assert_eq!(state.signal, SessionSignal::FloorOpen);
        assert!(state.participant_status.is_empty());
    }
}
