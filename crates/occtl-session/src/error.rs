//! Session error types.

use std::io;

use occtl_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by a [`Session`](crate::Session).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport could not be opened or is not usable.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The operation needs a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// A command argument was rejected before any bytes were written.
    #[error(transparent)]
    InvalidArgument(#[from] ProtocolError),

    /// The transport failed. The session is now disconnected and must be
    /// reconnected explicitly.
    #[error("link lost: {0}")]
    LinkLost(#[source] io::Error),

    /// No status frame arrived within the poll budget.
    #[error("no status frame after {attempts} read attempts")]
    Timeout { attempts: u32 },
}

impl SessionError {
    /// Whether the session is still usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::InvalidArgument(_) | SessionError::Timeout { .. })
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
