//! Session state: the last values the controller reported, each paired with
//! the time it was observed, plus the fault history.

use std::time::Instant;

use occtl_protocol::{
    Celsius, Command, CommandKind, DecodedFields, FaultCode, FieldUpdate,
    DEFAULT_CONTINUOUS_OUTPUT, DEFAULT_OUTPUT_ENABLED, DEFAULT_RAMP_RATE_C_PER_S,
    DEFAULT_SETPOINT_C,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Value Types
// ============================================================================

/// A value and the instant it was observed. Replaced whole on every update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampedValue<T> {
    pub value: T,
    pub observed_at: Instant,
}

impl<T> TimestampedValue<T> {
    pub fn new(value: T, observed_at: Instant) -> Self {
        TimestampedValue { value, observed_at }
    }

    /// Time since the value was observed, measured from `now`.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.observed_at)
    }
}

/// A fault transition recorded by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEvent {
    pub code: FaultCode,
    pub detected_at: Instant,
}

/// How status frames reach the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// One status frame per `QueryStatus`.
    #[default]
    Polled,
    /// The controller streams status frames unprompted.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

// ============================================================================
// Fault Queue
// ============================================================================

/// Detection-ordered fault history. The session only appends; the caller
/// drains or clears.
#[derive(Debug, Clone, Default)]
pub struct FaultQueue {
    events: Vec<FaultEvent>,
}

impl FaultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, event: FaultEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FaultEvent> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[FaultEvent] {
        &self.events
    }

    /// The most recently detected fault.
    pub fn latest(&self) -> Option<&FaultEvent> {
        self.events.last()
    }

    /// Remove and return every event, oldest first.
    pub fn drain(&mut self) -> Vec<FaultEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

// ============================================================================
// Commanded Values
// ============================================================================

/// What the host last told the controller to do.
///
/// These are values successfully written, not values the controller
/// confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandedValues {
    pub setpoint: Celsius,
    pub ramp_rate: f64,
    pub continuous_output: bool,
    pub output_enabled: bool,
}

impl Default for CommandedValues {
    fn default() -> Self {
        CommandedValues {
            setpoint: DEFAULT_SETPOINT_C,
            ramp_rate: DEFAULT_RAMP_RATE_C_PER_S,
            continuous_output: DEFAULT_CONTINUOUS_OUTPUT,
            output_enabled: DEFAULT_OUTPUT_ENABLED,
        }
    }
}

impl CommandedValues {
    /// Record a command the transport accepted.
    pub fn record(&mut self, command: &Command) {
        match *command {
            Command::SetTemperature(value) => self.setpoint = value,
            Command::SetRampRate(value) => self.ramp_rate = value,
            Command::Enable => self.output_enabled = true,
            Command::Disable => self.output_enabled = false,
            Command::SetContinuousOutput(on) => self.continuous_output = on,
            Command::ResetDefaults => *self = CommandedValues::default(),
            Command::QueryStatus => {}
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Values reported by the controller.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    setpoint: Option<TimestampedValue<Celsius>>,
    temperature: Option<TimestampedValue<Celsius>>,
    fault: Option<TimestampedValue<FaultCode>>,
    reported_ramp_rate: Option<TimestampedValue<f64>>,
    last_ack: Option<TimestampedValue<CommandKind>>,
    faults: FaultQueue,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every update in `fields`, in order, observed at `at`.
    ///
    /// Returns the fault events this frame appended to the queue.
    pub fn apply(&mut self, fields: &DecodedFields, at: Instant) -> Vec<FaultEvent> {
        let mut detected = Vec::new();
        for update in fields {
            if let Some(event) = self.apply_update(*update, at) {
                detected.push(event);
            }
        }
        detected
    }

    fn apply_update(&mut self, update: FieldUpdate, at: Instant) -> Option<FaultEvent> {
        match update {
            FieldUpdate::Setpoint(v) => self.setpoint = Some(TimestampedValue::new(v, at)),
            FieldUpdate::Temperature(v) => self.temperature = Some(TimestampedValue::new(v, at)),
            FieldUpdate::RampRate(v) => {
                self.reported_ramp_rate = Some(TimestampedValue::new(v, at))
            }
            FieldUpdate::Ack(kind) => self.last_ack = Some(TimestampedValue::new(kind, at)),
            FieldUpdate::Fault(code) => return self.apply_fault(code, at),
        }
        None
    }

    /// An unknown previous code counts as healthy.
    fn apply_fault(&mut self, code: FaultCode, at: Instant) -> Option<FaultEvent> {
        let previous = self.current_fault_code();
        self.fault = Some(TimestampedValue::new(code, at));

        if code.is_fault() && code != previous {
            let event = FaultEvent { code, detected_at: at };
            self.faults.push(event);
            Some(event)
        } else {
            None
        }
    }

    /// Forget every reported value. The fault queue is kept.
    pub(crate) fn clear_values(&mut self) {
        let faults = std::mem::take(&mut self.faults);
        *self = SessionState { faults, ..Default::default() };
    }

    pub fn setpoint(&self) -> Option<TimestampedValue<Celsius>> {
        self.setpoint
    }

    pub fn temperature(&self) -> Option<TimestampedValue<Celsius>> {
        self.temperature
    }

    pub fn fault(&self) -> Option<TimestampedValue<FaultCode>> {
        self.fault
    }

    /// The current fault code, `0` when unknown.
    pub fn current_fault_code(&self) -> FaultCode {
        self.fault.map(|f| f.value).unwrap_or(FaultCode::NONE)
    }

    pub fn reported_ramp_rate(&self) -> Option<TimestampedValue<f64>> {
        self.reported_ramp_rate
    }

    pub fn last_ack(&self) -> Option<TimestampedValue<CommandKind>> {
        self.last_ack
    }

    pub fn faults(&self) -> &FaultQueue {
        &self.faults
    }

    pub(crate) fn faults_mut(&mut self) -> &mut FaultQueue {
        &mut self.faults
    }
}

/// Point-in-time copy of everything a caller can observe about a session.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub connection: ConnectionState,
    pub mode: OperatingMode,
    pub setpoint: Option<TimestampedValue<Celsius>>,
    pub temperature: Option<TimestampedValue<Celsius>>,
    pub fault: Option<TimestampedValue<FaultCode>>,
    pub reported_ramp_rate: Option<TimestampedValue<f64>>,
    pub last_ack: Option<TimestampedValue<CommandKind>>,
    pub commanded: CommandedValues,
    /// Fault events waiting to be drained.
    pub pending_faults: usize,
}

impl StatusSnapshot {
    pub fn temperature_c(&self) -> Option<Celsius> {
        self.temperature.map(|t| t.value)
    }

    pub fn setpoint_c(&self) -> Option<Celsius> {
        self.setpoint.map(|s| s.value)
    }

    pub fn fault_code(&self) -> FaultCode {
        self.fault.map(|f| f.value).unwrap_or(FaultCode::NONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fault(code: u8) -> DecodedFields {
        DecodedFields::new().with_fault(FaultCode(code))
    }

    #[test]
    fn test_apply_replaces_values() {
        let mut state = SessionState::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(10);

        state.apply(&DecodedFields::new().with_setpoint(60.0).with_temperature(20.0), t0);
        state.apply(&DecodedFields::new().with_temperature(21.5), t1);

        assert_eq!(state.setpoint(), Some(TimestampedValue::new(60.0, t0)));
        assert_eq!(state.temperature(), Some(TimestampedValue::new(21.5, t1)));
        assert!(state.fault().is_none());
    }

    #[test]
    fn test_fault_transitions() {
        let mut state = SessionState::new();
        let start = Instant::now();
        let at = |ms| start + Duration::from_millis(ms);

        assert!(state.apply(&fault(0), at(0)).is_empty());
        assert_eq!(state.apply(&fault(3), at(1)).len(), 1);
        assert!(state.apply(&fault(3), at(2)).is_empty());
        assert!(state.apply(&fault(0), at(3)).is_empty());

        assert_eq!(state.faults().len(), 1);
        assert_eq!(state.faults().as_slice()[0], FaultEvent { code: FaultCode(3), detected_at: at(1) });
        assert_eq!(state.fault().unwrap().value, FaultCode::NONE);
    }

    #[test]
    fn test_repeated_fault_refreshes_timestamp() {
        let mut state = SessionState::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);

        state.apply(&fault(5), t0);
        state.apply(&fault(5), t1);

        assert_eq!(state.fault(), Some(TimestampedValue::new(FaultCode(5), t1)));
        assert_eq!(state.faults().len(), 1);
    }

    #[test]
    fn test_fault_change_without_clear() {
        let mut state = SessionState::new();
        let now = Instant::now();
        state.apply(&fault(2), now);
        state.apply(&fault(4), now);

        let codes: Vec<_> = state.faults().iter().map(|e| e.code.0).collect();
        assert_eq!(codes, vec![2, 4]);
    }

    #[test]
    fn test_clear_values_keeps_faults() {
        let mut state = SessionState::new();
        let now = Instant::now();
        state.apply(&fault(1).with_temperature(30.0), now);

        state.clear_values();
        assert!(state.temperature().is_none());
        assert!(state.fault().is_none());
        assert_eq!(state.faults().len(), 1);
    }

    #[test]
    fn test_commanded_record() {
        let mut commanded = CommandedValues::default();
        commanded.record(&Command::SetTemperature(80.0));
        commanded.record(&Command::SetRampRate(0.1));
        commanded.record(&Command::Enable);
        commanded.record(&Command::SetContinuousOutput(true));

        assert_eq!(commanded.setpoint, 80.0);
        assert_eq!(commanded.ramp_rate, 0.1);
        assert!(commanded.output_enabled);
        assert!(commanded.continuous_output);

        commanded.record(&Command::ResetDefaults);
        assert_eq!(commanded, CommandedValues::default());
        assert_eq!(commanded.setpoint, 40.0);
        assert_eq!(commanded.ramp_rate, 100.0);
    }
}
