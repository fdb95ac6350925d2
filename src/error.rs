use std::io;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError as MpscSendError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("no connector for the given local and remote addresses")]
    ErrNoRoute,
    #[error("transaction already answered")]
    ErrTransactionAlreadyAnswered,
    #[error("transaction does not exist")]
    ErrTransactionDoesNotExist,
    #[error("i/o timeout")]
    ErrTimeout,
    #[error("use of closed network connection")]
    ErrClosed,
    #[error("stack is stopped")]
    ErrStackStopped,
    #[error("no active endpoint to send through")]
    ErrNoActiveEndpoint,
    #[error("endpoint already added")]
    ErrEndpointExists,
    #[error("endpoint not found")]
    ErrEndpointNotFound,
    #[error("listener address mismatch")]
    ErrAddrMismatch,
    #[error("stream closed before a frame length could be read")]
    ErrHolePunch,
    #[error("{0}")]
    Other(String),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("mpsc send: {0}")]
    MpscSend(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

// Because Tokio SendError is parameterized, we sadly lose the backtrace.
impl<T> From<MpscSendError<T>> for Error {
    fn from(e: MpscSendError<T>) -> Self {
        Error::MpscSend(e.to_string())
    }
}
