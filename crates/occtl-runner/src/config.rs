//! Runner configuration.
//!
//! Loaded from YAML; every section is optional.
//!
//! ```yaml
//! transport:
//!   type: tcp
//!   address: 192.168.1.40:4001
//! session:
//!   device_name: oven-1
//!   framing: delimited
//!   status_poll_attempts: 20
//!   poll_interval_ms: 50
//! ```

use std::path::Path;
use std::time::Duration;

use occtl_session::{SessionConfig, SimulatorConfig};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};
use crate::serial::DEFAULT_BAUD;

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

/// Where the controller is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// A TCP server bridging the controller's serial port.
    Tcp {
        address: String,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
    /// A local serial port.
    Serial {
        path: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    /// The built-in simulated controller.
    Simulated,
}

impl TransportConfig {
    pub fn tcp(address: impl Into<String>) -> Self {
        TransportConfig::Tcp {
            address: address.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn serial(path: impl Into<String>, baud: Option<u32>) -> Self {
        TransportConfig::Serial {
            path: path.into(),
            baud: baud.unwrap_or(DEFAULT_BAUD),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        match self {
            TransportConfig::Tcp { connect_timeout_ms, .. } => Duration::from_millis(*connect_timeout_ms),
            _ => Duration::from_millis(default_connect_timeout_ms()),
        }
    }
}

/// Top-level runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub transport: Option<TransportConfig>,
    pub session: SessionConfig,
    /// Parameters of the simulated controller used by `--simulate`.
    pub simulator: SimulatorConfig,
}

impl RunnerConfig {
    pub fn from_yaml(text: &str) -> RunnerResult<Self> {
        let config: RunnerConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> RunnerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> RunnerResult<()> {
        if self.session.status_poll_attempts == 0 {
            return Err(RunnerError::Config(
                "session.status_poll_attempts must be at least 1".to_string(),
            ));
        }
        match &self.transport {
            Some(TransportConfig::Tcp { address, .. }) if address.is_empty() => {
                Err(RunnerError::Config("transport.address is empty".to_string()))
            }
            Some(TransportConfig::Serial { path, .. }) if path.is_empty() => {
                Err(RunnerError::Config("transport.path is empty".to_string()))
            }
            Some(TransportConfig::Serial { baud: 0, .. }) => {
                Err(RunnerError::Config("transport.baud must be non-zero".to_string()))
            }
            _ => Ok(()),
        }
    }
}
