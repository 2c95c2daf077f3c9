//! Decoded frame contents.

use serde::{Deserialize, Serialize};

use crate::commands::{Celsius, CommandKind};

/// Fault code reported by the controller. `0` means no fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FaultCode(pub u8);

impl FaultCode {
    /// The healthy code.
    pub const NONE: FaultCode = FaultCode(0);

    /// Whether this code reports a fault.
    pub fn is_fault(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for FaultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single field update carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldUpdate {
    /// Acknowledged setpoint.
    Setpoint(Celsius),
    /// Measured process temperature.
    Temperature(Celsius),
    /// Current fault code.
    Fault(FaultCode),
    /// Active ramp rate in °C/s.
    RampRate(f64),
    /// A command the controller accepted.
    Ack(CommandKind),
}

/// All field updates decoded from one frame, in the order they appeared.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFields {
    updates: Vec<FieldUpdate>,
}

impl DecodedFields {
    /// An empty record.
    pub fn new() -> Self {
        DecodedFields { updates: Vec::new() }
    }

    /// Append an update.
    pub fn push(&mut self, update: FieldUpdate) {
        self.updates.push(update);
    }

    pub fn with_setpoint(mut self, value: Celsius) -> Self {
        self.push(FieldUpdate::Setpoint(value));
        self
    }

    pub fn with_temperature(mut self, value: Celsius) -> Self {
        self.push(FieldUpdate::Temperature(value));
        self
    }

    pub fn with_fault(mut self, code: FaultCode) -> Self {
        self.push(FieldUpdate::Fault(code));
        self
    }

    pub fn with_ramp_rate(mut self, value: f64) -> Self {
        self.push(FieldUpdate::RampRate(value));
        self
    }

    pub fn with_ack(mut self, kind: CommandKind) -> Self {
        self.push(FieldUpdate::Ack(kind));
        self
    }

    /// The updates, in frame order.
    pub fn updates(&self) -> &[FieldUpdate] {
        &self.updates
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldUpdate> {
        self.updates.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// The last setpoint in the record, if any.
    pub fn setpoint(&self) -> Option<Celsius> {
        self.updates.iter().rev().find_map(|u| match u {
            FieldUpdate::Setpoint(v) => Some(*v),
            _ => None,
        })
    }

    /// The last temperature in the record, if any.
    pub fn temperature(&self) -> Option<Celsius> {
        self.updates.iter().rev().find_map(|u| match u {
            FieldUpdate::Temperature(v) => Some(*v),
            _ => None,
        })
    }

    /// The last fault code in the record, if any.
    pub fn fault(&self) -> Option<FaultCode> {
        self.updates.iter().rev().find_map(|u| match u {
            FieldUpdate::Fault(code) => Some(*code),
            _ => None,
        })
    }
}

impl FromIterator<FieldUpdate> for DecodedFields {
    fn from_iter<I: IntoIterator<Item = FieldUpdate>>(iter: I) -> Self {
        DecodedFields { updates: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a DecodedFields {
    type Item = &'a FieldUpdate;
    type IntoIter = std::slice::Iter<'a, FieldUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.iter()
    }
}
