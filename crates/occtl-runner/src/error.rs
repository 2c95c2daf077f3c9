use std::io;

use occtl_session::SessionError;
use thiserror::Error;

/// Errors that end an `occtl` run.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("gave up after {0:?} without a stable temperature")]
    NotStable(std::time::Duration),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
