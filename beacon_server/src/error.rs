use crate::state::StateKind;
use core::net::SocketAddr;

/// Errors related to the server transport
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("could not listen on {address}: {reason}")]
    Bind { address: SocketAddr, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Other(String),
}

/// Errors surfaced by the [`ServerStateMachine`](crate::machine::ServerStateMachine).
///
/// Every other failure (hosting platform calls, client rejections, ...) is logged and handled inside the
/// state machine.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LifecycleError {
    #[error("the transport could not be started")]
    StartFailed,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot start the server while in state {0:?}")]
    InvalidState(StateKind),
}
