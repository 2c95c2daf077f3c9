//! Temperature stability detection.
//!
//! The temperature is stable once every observation for `hold` has been
//! within `range` of the target. Any observation outside the band restarts
//! the hold.

use std::time::{Duration, Instant};

use occtl_protocol::Celsius;
use serde::{Deserialize, Serialize};

/// What counts as stable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityCriteria {
    pub target: Celsius,
    /// Largest accepted |temperature - target| (°C).
    pub range: Celsius,
    pub hold: Duration,
}

/// Result of one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stability {
    OutOfRange { deviation: Celsius },
    Settling { in_range_for: Duration },
    Stable { in_range_for: Duration },
}

impl Stability {
    pub fn is_stable(&self) -> bool {
        matches!(self, Stability::Stable { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    criteria: StabilityCriteria,
    entered_at: Option<Instant>,
}

impl StabilityMonitor {
    pub fn new(criteria: StabilityCriteria) -> Self {
        StabilityMonitor {
            criteria,
            entered_at: None,
        }
    }

    pub fn criteria(&self) -> &StabilityCriteria {
        &self.criteria
    }

    /// Record one temperature observed at `at`.
    pub fn observe(&mut self, temperature: Celsius, at: Instant) -> Stability {
        let deviation = temperature - self.criteria.target;
        if !(deviation.abs() <= self.criteria.range) {
            self.entered_at = None;
            return Stability::OutOfRange { deviation };
        }

        let entered = *self.entered_at.get_or_insert(at);
        let in_range_for = at.saturating_duration_since(entered);
        if in_range_for >= self.criteria.hold {
            Stability::Stable { in_range_for }
        } else {
            Stability::Settling { in_range_for }
        }
    }

    pub fn reset(&mut self) {
        self.entered_at = None;
    }
}
