use pacer_proto::ProtocolError;
use thiserror::Error;
use transport_bus::BusError;

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("pacer store must be created inside a tokio runtime")]
    NoRuntime,
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type PacerResult<T> = Result<T, PacerError>;
