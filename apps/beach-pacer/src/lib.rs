//! Beach Pacer: presence and pacing signals for a shared session.
//!
//! Every client keeps a full replica of the session state. Participants
//! publish their own status; a single leader publishes the session-wide
//! signal and answers state requests from late joiners. Replicas converge by
//! applying each other's messages from a shared broadcast bus.
//!
//! - [`store::PacerStore`] owns the replica, gates leader-only mutations and
//!   fans out coalesced change notifications.
//! - [`sync`] encodes outbound changes and routes inbound ones.
//! - [`countdown`] re-evaluates an absolute deadline once per tick.
//! - [`persistence`] snapshots the leader's replica between restarts.
//! - [`client::PacerClient`] wires all of the above for one participant.

pub mod client;
pub mod clock;
pub mod config;
pub mod countdown;
pub mod directory;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod role;
pub mod store;
pub mod sync;

pub use client::PacerClient;
pub use config::Config;
pub use error::{PacerError, PacerResult};
pub use pacer_proto::{
    Envelope, PacerMessage, ParticipantStatus, SessionSignal, SessionSnapshot, SessionState,
};
pub use store::{Outbox, PacerStore, StoreConfig};
