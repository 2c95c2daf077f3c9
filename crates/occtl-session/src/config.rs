//! Session configuration.

use std::time::Duration;

use occtl_protocol::Framing;
use serde::{Deserialize, Serialize};

/// Default read attempts for one status request.
pub const DEFAULT_STATUS_POLL_ATTEMPTS: u32 = 20;

/// Default pause between status read attempts (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Configuration for one [`Session`](crate::Session).
///
/// Every field has a default, so an empty YAML mapping is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name used in logs and metric labels.
    pub device_name: String,
    /// Framing rule, which selects the codec.
    pub framing: Framing,
    /// Read/decode cycles `request_status` makes before giving up.
    pub status_poll_attempts: u32,
    /// Interval passed to the transport's pacing hook between attempts.
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device_name: "oc".to_string(),
            framing: Framing::default(),
            status_poll_attempts: DEFAULT_STATUS_POLL_ATTEMPTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_status_poll_attempts(mut self, attempts: u32) -> Self {
        self.status_poll_attempts = attempts;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
