//! Who is in the session, as far as the host application knows.
//!
//! The pacer state only tracks participants that have touched their status;
//! the roster shown to the leader is built by joining that with the host's
//! directory so untouched participants still appear as `Engaged`.

use pacer_proto::{ParticipantStatus, SessionSnapshot};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub connected: bool,
    pub is_leader: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            connected: true,
            is_leader: false,
        }
    }

    pub fn leader(mut self) -> Self {
        self.is_leader = true;
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }
}

pub trait ParticipantDirectory: Send + Sync {
    fn participants(&self) -> Vec<Participant>;
}

/// Directory backed by a plain list, for tests and the simulator.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    participants: RwLock<Vec<Participant>>,
}

impl StaticDirectory {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self {
            participants: RwLock::new(participants),
        }
    }

    /// Adds `participant`, replacing any entry with the same id.
    pub fn upsert(&self, participant: Participant) {
        let mut guard = self.participants.write();
        match guard.iter_mut().find(|existing| existing.id == participant.id) {
            Some(existing) => *existing = participant,
            None => guard.push(participant),
        }
    }

    pub fn set_connected(&self, id: &str, connected: bool) {
        if let Some(entry) = self.participants.write().iter_mut().find(|p| p.id == id) {
            entry.connected = connected;
        }
    }
}

impl ParticipantDirectory for StaticDirectory {
    fn participants(&self) -> Vec<Participant> {
        self.participants.read().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub id: String,
    pub display_name: String,
    pub status: ParticipantStatus,
}

/// Connected non-leader participants with their current status, ordered by
/// display name (then id, for stable output).
pub fn participant_view(
    snapshot: &SessionSnapshot,
    directory: &dyn ParticipantDirectory,
) -> Vec<ParticipantView> {
    let mut roster: Vec<ParticipantView> = directory
        .participants()
        .into_iter()
        .filter(|participant| participant.connected && !participant.is_leader)
        .map(|participant| ParticipantView {
            status: snapshot.status_of(&participant.id),
            id: participant.id,
            display_name: participant.display_name,
        })
        .collect();
    roster.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.id.cmp(&b.id))
    });
    roster
}
