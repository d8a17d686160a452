//! Shared session model and wire protocol for Beach Pacer clients.
//! Kept free of runtime dependencies so other languages can mirror the
//! taxonomy without pulling in the client core.

pub mod message;
pub mod model;

pub use message::{Envelope, PacerMessage, ProtocolError};
pub use model::{ParticipantStatus, SessionSignal, SessionSnapshot, SessionState, SignalChange};
