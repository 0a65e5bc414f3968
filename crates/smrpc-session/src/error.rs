//! Error types for local session-management calls.
//!
//! Protocol outcomes travel as `SmErrType` inside response packets and are
//! never reported through this type.

use smrpc_core::wire::{SmErrType, WireError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session {0} does not exist")]
    UnknownSession(u16),

    #[error("session {0} is not a client session")]
    NotClient(u16),

    #[error("session {0} is still connecting")]
    SessionBusy(u16),

    #[error("a runtime instance cannot open a session to itself")]
    SelfConnect,

    #[error("session admission refused: {0}")]
    Admission(SmErrType),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("rpc actor has shut down")]
    ActorGone,
}

pub type Result<T> = std::result::Result<T, Error>;
