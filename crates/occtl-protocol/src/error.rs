//! Protocol error types.

use thiserror::Error;

/// Errors raised while building a command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A numeric argument is outside what the controller accepts.
    #[error("invalid argument: {name} = {value} (accepted {min}..={max})")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Rejected value.
        value: f64,
        /// Lowest accepted value.
        min: f64,
        /// Highest accepted value.
        max: f64,
    },
}

/// Errors raised while decoding a complete frame.
///
/// A frame that fails to decode is dropped. It is never retried or
/// reinterpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Checksum or format mismatch.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FrameError::Malformed(reason.into())
    }
}

/// Result type alias for frame decoding.
pub type FrameResult<T> = Result<T, FrameError>;
