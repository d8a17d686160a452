use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{ParticipantStatus, SessionState, SignalChange};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed pacer message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("pacer message is not a json object")]
    NotAnObject,
    #[error("pacer message missing field {0}")]
    MissingField(&'static str),
    #[error("unknown pacer message type {0}")]
    UnknownType(String),
}

/// Messages exchanged on the session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PacerMessage {
    /// A participant announces its own status.
    StatusChanged {
        participant_id: String,
        status: ParticipantStatus,
    },
    SoftSignal {},
    /// `deadline` is the leader's clock plus the duration, in epoch millis.
    /// Peers derive remaining time from it rather than counting down.
    CountdownStarted { deadline: i64 },
    FloorOpen {},
    SignalCancelled {},
    ResetAll {},
    /// Sent by a joining client; only the leader answers.
    RequestState {},
    /// Leader reply to `RequestState`. Everyone but the target ignores it.
    StateSnapshot {
        target_participant_id: String,
        state: SessionState,
    },
}

impl PacerMessage {
    pub const TYPES: [&'static str; 8] = [
        "status_changed",
        "soft_signal",
        "countdown_started",
        "floor_open",
        "signal_cancelled",
        "reset_all",
        "request_state",
        "state_snapshot",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            PacerMessage::StatusChanged { .. } => "status_changed",
            PacerMessage::SoftSignal {} => "soft_signal",
            PacerMessage::CountdownStarted { .. } => "countdown_started",
            PacerMessage::FloorOpen {} => "floor_open",
            PacerMessage::SignalCancelled {} => "signal_cancelled",
            PacerMessage::ResetAll {} => "reset_all",
            PacerMessage::RequestState {} => "request_state",
            PacerMessage::StateSnapshot { .. } => "state_snapshot",
        }
    }

    /// Wire message announcing a leader signal transition.
    pub fn for_signal(change: SignalChange) -> Self {
        match change {
            SignalChange::Soft => PacerMessage::SoftSignal {},
            SignalChange::Countdown { deadline } => PacerMessage::CountdownStarted { deadline },
            SignalChange::FloorOpen => PacerMessage::FloorOpen {},
            SignalChange::Cancel => PacerMessage::SignalCancelled {},
            SignalChange::Reset => PacerMessage::ResetAll {},
        }
    }

    /// Inverse of [`PacerMessage::for_signal`].
    pub fn signal_change(&self) -> Option<SignalChange> {
        match self {
            PacerMessage::SoftSignal {} => Some(SignalChange::Soft),
            PacerMessage::CountdownStarted { deadline } => Some(SignalChange::Countdown {
                deadline: *deadline,
            }),
            PacerMessage::FloorOpen {} => Some(SignalChange::FloorOpen),
            PacerMessage::SignalCancelled {} => Some(SignalChange::Cancel),
            PacerMessage::ResetAll {} => Some(SignalChange::Reset),
            _ => None,
        }
    }
}

/// A message plus the id of the client instance that produced it.
///
/// Wire shape: `{"type": .., "instance_id": .., "payload": {..}}`. A missing
/// or null payload is read as `{}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub instance_id: Uuid,
    pub message: PacerMessage,
}

impl Envelope {
    pub fn new(instance_id: Uuid, message: PacerMessage) -> Self {
        Self {
            instance_id,
            message,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut value = serde_json::to_value(&self.message)?;
        let object = value.as_object_mut().ok_or(ProtocolError::NotAnObject)?;
        object.insert(
            "instance_id".to_string(),
            Value::String(self.instance_id.to_string()),
        );
        Ok(serde_json::to_vec(&value)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut value: Value = serde_json::from_slice(bytes)?;
        let object = value.as_object_mut().ok_or(ProtocolError::NotAnObject)?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("type"))?;
        if !PacerMessage::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        let instance_id = object
            .remove("instance_id")
            .ok_or(ProtocolError::MissingField("instance_id"))?;
        let instance_id: Uuid = serde_json::from_value(instance_id)?;

        let payload = object
            .entry("payload")
            .or_insert_with(|| Value::Object(Map::new()));
        if payload.is_null() {
            *payload = Value::Object(Map::new());
        }

        let message = serde_json::from_value(value)?;
        Ok(Self {
            instance_id,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionSignal;

    fn decode_str(raw: &str) -> Result<Envelope, ProtocolError> {
        Envelope::decode(raw.as_bytes())
    }

    #[test]
    fn encodes_type_payload_and_instance() {
        let id = Uuid::new_v4();
        let bytes = Envelope::new(
            id,
            PacerMessage::StatusChanged {
                participant_id: "p1".into(),
                status: ParticipantStatus::HandRaised,
            },
        )
        .encode()
        .expect("encode");
        let value: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["type"], "status_changed");
        assert_eq!(value["instance_id"], id.to_string());
        assert_eq!(value["payload"]["participant_id"], "p1");
        assert_eq!(value["payload"]["status"], "hand_raised");
    }

    #[test]
    fn empty_payload_messages_decode_without_payload() {
        let id = Uuid::new_v4();
        let env = decode_str(&format!(r#"{{"type":"soft_signal","instance_id":"{id}"}}"#))
            .expect("missing payload");
        assert_eq!(env.message, PacerMessage::SoftSignal {});

        let env = decode_str(&format!(
            r#"{{"type":"request_state","instance_id":"{id}","payload":null}}"#
        ))
        .expect("null payload");
        assert_eq!(env.message, PacerMessage::RequestState {});
    }

    #[test]
    fn snapshot_reply_decodes() {
        let id = Uuid::new_v4();
        let env = decode_str(&format!(
            r#"{{"type":"state_snapshot","instance_id":"{id}","payload":{{"target_participant_id":"c","state":{{"participant_status":{{"p":"need_time"}},"signal":"countdown","countdown_deadline":99}}}}}}"#
        ))
        .expect("snapshot");
        match env.message {
            PacerMessage::StateSnapshot {
                target_participant_id,
                state,
            } => {
                assert_eq!(target_participant_id, "c");
                assert_eq!(state.status_of("p"), ParticipantStatus::NeedTime);
                assert_eq!(state.signal, SessionSignal::Countdown);
                assert_eq!(state.countdown_deadline, Some(99));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        let id = Uuid::new_v4();
        assert!(matches!(
            decode_str(&format!(r#"{{"type":"confetti","instance_id":"{id}"}}"#)),
            Err(ProtocolError::UnknownType(kind)) if kind == "confetti"
        ));
        assert!(matches!(
            decode_str("[1,2,3]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(matches!(
            decode_str("not json"),
            Err(ProtocolError::Decode(_))
        ));
        assert!(matches!(
            decode_str(r#"{"type":"soft_signal"}"#),
            Err(ProtocolError::MissingField("instance_id"))
        ));
        assert!(decode_str(&format!(
            r#"{{"type":"status_changed","instance_id":"{id}","payload":{{"participant_id":"p","status":"asleep"}}}}"#
        ))
        .is_err());
    }

    #[test]
    fn signal_messages_map_both_ways() {
        for change in [
            SignalChange::Soft,
            SignalChange::Countdown { deadline: 42 },
            SignalChange::FloorOpen,
            SignalChange::Cancel,
            SignalChange::Reset,
        ] {
            assert_eq!(PacerMessage::for_signal(change).signal_change(), Some(change));
        }
        assert_eq!(PacerMessage::RequestState {}.signal_change(), None);
    }

    #[test]
    fn kind_matches_serialized_type() {
        let message = PacerMessage::CountdownStarted { deadline: 1 };
        let value = serde_json::to_value(&message).expect("value");
        assert_eq!(value["type"], message.kind());
        assert!(PacerMessage::TYPES.contains(&message.kind()));
    }
}
