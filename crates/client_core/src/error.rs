use thiserror::Error;

use crate::transport::{HttpResponse, TransportError};

/// Synchronous rejection from [`crate::SingleFlightCaller::invoke`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("no operation registered under {0:?}")]
    UnknownOperation(String),
    #[error("operation {0:?} rejected: another call is still in flight")]
    Busy(String),
}

/// What an operation's failure callback receives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server answered with status {}", .0.status)]
    NonSuccessStatus(HttpResponse),
}

impl CallFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::NonSuccessStatus(response) => Some(response.status),
        }
    }
}
