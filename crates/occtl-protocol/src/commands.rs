//! Commands that can be sent to the controller.
//!
//! Commands fall into two groups:
//! - State-affecting commands (setpoint, ramp rate, output, defaults, mode)
//! - The status query used in polled mode

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ProtocolError;

/// Temperature in degrees Celsius.
pub type Celsius = f64;

/// Commands that can be sent to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Set the target temperature in °C.
    SetTemperature(Celsius),

    /// Set the ramp rate in °C/s.
    SetRampRate(f64),

    /// Enable the heater output.
    Enable,

    /// Disable the heater output.
    Disable,

    /// Restore setpoint, ramp rate, continuous output, and output state to
    /// their factory defaults.
    ResetDefaults,

    /// Switch unsolicited status output on or off.
    SetContinuousOutput(bool),

    /// Ask for one status frame.
    QueryStatus,
}

impl Command {
    /// The kind of this command, without its argument.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetTemperature(_) => CommandKind::SetTemperature,
            Command::SetRampRate(_) => CommandKind::SetRampRate,
            Command::Enable => CommandKind::Enable,
            Command::Disable => CommandKind::Disable,
            Command::ResetDefaults => CommandKind::ResetDefaults,
            Command::SetContinuousOutput(_) => CommandKind::SetContinuousOutput,
            Command::QueryStatus => CommandKind::QueryStatus,
        }
    }

    /// Check numeric arguments against the accepted ranges.
    ///
    /// Codecs call this before producing any bytes. Accepted arguments are
    /// then rounded to the codec's wire precision; see
    /// [`FrameCodec::quantize`](crate::FrameCodec::quantize).
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match *self {
            Command::SetTemperature(value) => {
                check_range("setpoint", value, MIN_SETPOINT_C, MAX_SETPOINT_C)
            }
            Command::SetRampRate(value) => check_range(
                "ramp_rate",
                value,
                MIN_RAMP_RATE_C_PER_S,
                MAX_RAMP_RATE_C_PER_S,
            ),
            _ => Ok(()),
        }
    }

    /// The command with its numeric argument, if any, passed through `f`.
    pub fn map_argument(self, f: impl FnOnce(f64) -> f64) -> Command {
        match self {
            Command::SetTemperature(value) => Command::SetTemperature(f(value)),
            Command::SetRampRate(value) => Command::SetRampRate(f(value)),
            other => other,
        }
    }

    /// Whether the command changes controller configuration or output.
    pub fn is_state_affecting(&self) -> bool {
        !matches!(self, Command::QueryStatus | Command::SetContinuousOutput(_))
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ProtocolError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ProtocolError::InvalidArgument { name, value, min, max })
    }
}

/// Command kinds, used to name acknowledged commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    SetTemperature,
    SetRampRate,
    Enable,
    Disable,
    ResetDefaults,
    SetContinuousOutput,
    QueryStatus,
}

impl CommandKind {
    /// Every command kind, in opcode order.
    pub const ALL: [CommandKind; 7] = [
        CommandKind::SetTemperature,
        CommandKind::SetRampRate,
        CommandKind::Enable,
        CommandKind::Disable,
        CommandKind::ResetDefaults,
        CommandKind::SetContinuousOutput,
        CommandKind::QueryStatus,
    ];

    /// Text mnemonic of the command.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CommandKind::SetTemperature => "SP",
            CommandKind::SetRampRate => "RR",
            CommandKind::Enable => "EN",
            CommandKind::Disable => "DS",
            CommandKind::ResetDefaults => "RST",
            CommandKind::SetContinuousOutput => "CO",
            CommandKind::QueryStatus => "QS",
        }
    }

    /// Parse a text mnemonic.
    pub fn from_mnemonic(s: &str) -> Option<CommandKind> {
        CommandKind::ALL.into_iter().find(|kind| kind.mnemonic() == s)
    }

    /// Binary opcode of the command.
    pub fn opcode(&self) -> u8 {
        match self {
            CommandKind::SetTemperature => 0x10,
            CommandKind::SetRampRate => 0x11,
            CommandKind::Enable => 0x12,
            CommandKind::Disable => 0x13,
            CommandKind::ResetDefaults => 0x14,
            CommandKind::SetContinuousOutput => 0x15,
            CommandKind::QueryStatus => 0x16,
        }
    }

    /// Parse a binary opcode.
    pub fn from_opcode(code: u8) -> Option<CommandKind> {
        CommandKind::ALL.into_iter().find(|kind| kind.opcode() == code)
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
