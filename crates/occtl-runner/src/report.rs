//! Wall-clock reporting of session observations.

use std::time::Instant;

use chrono::{DateTime, Local};
use occtl_protocol::{Celsius, CommandKind};
use occtl_session::{CommandedValues, FaultEvent, OperatingMode, StatusSnapshot};
use serde::Serialize;
use tracing::warn;

/// Maps session instants onto local wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
    origin_wall: DateTime<Local>,
}

impl WallClock {
    pub fn start() -> Self {
        WallClock {
            origin: Instant::now(),
            origin_wall: Local::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn wall_time(&self, at: Instant) -> DateTime<Local> {
        let offset = match at.checked_duration_since(self.origin) {
            Some(after) => chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero()),
            None => -chrono::Duration::from_std(self.origin - at).unwrap_or_else(|_| chrono::Duration::zero()),
        };
        self.origin_wall + offset
    }
}

/// Printable form of a [`StatusSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub time: DateTime<Local>,
    pub mode: OperatingMode,
    pub setpoint_c: Option<Celsius>,
    pub temperature_c: Option<Celsius>,
    pub fault_code: u8,
    pub reported_ramp_rate: Option<f64>,
    pub last_ack: Option<CommandKind>,
    pub commanded: CommandedValues,
}

impl StatusReport {
    pub fn new(snapshot: &StatusSnapshot, clock: &WallClock) -> Self {
        let observed = snapshot
            .temperature
            .map(|t| t.observed_at)
            .or(snapshot.setpoint.map(|s| s.observed_at))
            .unwrap_or_else(Instant::now);
        StatusReport {
            time: clock.wall_time(observed),
            mode: snapshot.mode,
            setpoint_c: snapshot.setpoint_c(),
            temperature_c: snapshot.temperature_c(),
            fault_code: snapshot.fault_code().0,
            reported_ramp_rate: snapshot.reported_ramp_rate.map(|r| r.value),
            last_ack: snapshot.last_ack.map(|a| a.value),
            commanded: snapshot.commanded,
        }
    }

    /// One human-readable line.
    pub fn summary(&self) -> String {
        let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "--".to_string());
        format!(
            "{} setpoint {} C, temperature {} C, fault {}",
            self.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            fmt(self.setpoint_c),
            fmt(self.temperature_c),
            self.fault_code
        )
    }
}

/// Log drained fault events with their wall-clock detection time.
pub fn log_faults(events: &[FaultEvent], clock: &WallClock) {
    for event in events {
        warn!(
            "fault code {} detected at {}",
            event.code,
            clock.wall_time(event.detected_at).to_rfc3339()
        );
    }
}
