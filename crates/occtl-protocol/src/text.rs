//! Delimited ASCII codec.
//!
//! Every frame is a single checksummed line:
//!
//! ```text
//! +-------+---------------------------+---+----+------+
//! | start | KEY=VALUE[,KEY=VALUE...]  | * | HH | \r\n |
//! +-------+---------------------------+---+----+------+
//! ```
//!
//! - `start` is `#` for device → host frames and `$` for host → device frames
//! - `HH` is the XOR of the body bytes as two hex digits
//! - the `\r` is optional; `\n` ends the frame
//!
//! Status frames from the controller look like `#SP=60,PV=58.7,FC=0*HH\r\n`.
//! Commands are a single item, for example `$SP=60.00*..` or `$QS*..`.

use log::debug;

use crate::codec::{leading_noise, xor_checksum, Frame, FrameCodec, Framing};
use crate::commands::{Command, CommandKind};
use crate::constants::*;
use crate::error::{FrameError, FrameResult, ProtocolError};
use crate::fields::{DecodedFields, FaultCode, FieldUpdate};

/// Codec for the newline-delimited ASCII grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    pub fn new() -> Self {
        TextCodec
    }

    /// Wrap a body into a complete line with the given start marker.
    pub fn frame_body(start: u8, body: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(body.len() + 6);
        buf.push(start);
        buf.extend_from_slice(body.as_bytes());
        buf.push(TEXT_CHECKSUM_SEPARATOR);
        buf.extend_from_slice(format!("{:02X}", xor_checksum(body.as_bytes())).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Text of the single item a command encodes to.
    pub fn command_body(command: &Command) -> String {
        let mnemonic = command.kind().mnemonic();
        match command {
            Command::SetTemperature(value) | Command::SetRampRate(value) => {
                format!("{}={:.2}", mnemonic, value)
            }
            Command::SetContinuousOutput(on) => format!("{}={}", mnemonic, u8::from(*on)),
            _ => mnemonic.to_string(),
        }
    }

    /// Find one line starting with `start` at the head of `buffer`.
    fn extract(buffer: &[u8], start: u8) -> (Option<Frame>, usize) {
        if buffer.is_empty() {
            return (None, 0);
        }

        if let Some(noise) = leading_noise(buffer, start) {
            return (Some(Frame::from(&buffer[..noise])), noise);
        }

        let window = &buffer[..buffer.len().min(MAX_TEXT_FRAME_LEN)];
        match window.iter().skip(1).position(|&b| b == TEXT_TERMINATOR || b == start) {
            Some(i) if window[i + 1] == TEXT_TERMINATOR => {
                return (Some(Frame::from(&buffer[..i + 2])), i + 2);
            }
            // A new start marker before the terminator: the line was cut short.
            Some(i) => return (Some(Frame::from(&buffer[..i + 1])), i + 1),
            None => {}
        }

        if buffer.len() < MAX_TEXT_FRAME_LEN {
            return (None, 0);
        }

        // No terminator within the maximum length: give up on this line up to
        // the next start marker so the buffer stays bounded.
        let end = buffer[1..]
            .iter()
            .position(|&b| b == start)
            .map(|i| i + 1)
            .unwrap_or(buffer.len());
        (Some(Frame::from(&buffer[..end])), end)
    }

    /// Check markers and checksum, returning the body text.
    fn unwrap_line(frame: &Frame, start: u8) -> FrameResult<&str> {
        let bytes = frame.as_bytes();
        let bytes = bytes
            .strip_suffix(&[TEXT_TERMINATOR])
            .ok_or_else(|| FrameError::malformed("missing terminator"))?;
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let bytes = bytes
            .strip_prefix(&[start])
            .ok_or_else(|| FrameError::malformed("missing start marker"))?;

        let sep = bytes
            .iter()
            .rposition(|&b| b == TEXT_CHECKSUM_SEPARATOR)
            .ok_or_else(|| FrameError::malformed("missing checksum"))?;
        let (body, checksum) = (&bytes[..sep], &bytes[sep + 1..]);

        let checksum = std::str::from_utf8(checksum)
            .ok()
            .filter(|s| s.len() == 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or_else(|| FrameError::malformed("bad checksum digits"))?;
        let expected = xor_checksum(body);
        if checksum != expected {
            return Err(FrameError::malformed(format!(
                "checksum mismatch: got {:02X}, expected {:02X}",
                checksum, expected
            )));
        }

        let body = std::str::from_utf8(body).map_err(|_| FrameError::malformed("invalid UTF-8"))?;
        if body.is_empty() {
            return Err(FrameError::malformed("empty body"));
        }
        Ok(body)
    }
}

fn parse_number(key: &str, value: &str) -> FrameResult<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FrameError::malformed(format!("invalid {}: {:?}", key, value)))
}

fn parse_field(item: &str) -> FrameResult<FieldUpdate> {
    let (key, value) = item
        .split_once('=')
        .ok_or_else(|| FrameError::malformed(format!("expected KEY=VALUE, got {:?}", item)))?;
    match key {
        KEY_SETPOINT => Ok(FieldUpdate::Setpoint(parse_number(key, value)?)),
        KEY_TEMPERATURE => Ok(FieldUpdate::Temperature(parse_number(key, value)?)),
        KEY_RAMP_RATE => Ok(FieldUpdate::RampRate(parse_number(key, value)?)),
        KEY_FAULT => value
            .parse::<u8>()
            .map(|code| FieldUpdate::Fault(FaultCode(code)))
            .map_err(|_| FrameError::malformed(format!("invalid fault code: {:?}", value))),
        KEY_ACK => CommandKind::from_mnemonic(value)
            .map(FieldUpdate::Ack)
            .ok_or_else(|| FrameError::malformed(format!("unknown ack mnemonic: {:?}", value))),
        _ => Err(FrameError::malformed(format!("unknown key: {:?}", key))),
    }
}

fn field_item(update: &FieldUpdate) -> String {
    match update {
        FieldUpdate::Setpoint(v) => format!("{}={}", KEY_SETPOINT, v),
        FieldUpdate::Temperature(v) => format!("{}={}", KEY_TEMPERATURE, v),
        FieldUpdate::Fault(code) => format!("{}={}", KEY_FAULT, code.0),
        FieldUpdate::RampRate(v) => format!("{}={}", KEY_RAMP_RATE, v),
        FieldUpdate::Ack(kind) => format!("{}={}", KEY_ACK, kind.mnemonic()),
    }
}

impl FrameCodec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn framing(&self) -> Framing {
        Framing::Delimited
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>, ProtocolError> {
        command.validate()?;
        Ok(Self::frame_body(TEXT_HOST_START, &Self::command_body(command)))
    }

    fn quantize(&self, command: &Command) -> Command {
        // Same formatting as `command_body`, so the value matches the wire text.
        command.map_argument(|value| format!("{:.2}", value).parse().unwrap_or(value))
    }

    fn try_extract_frame(&self, buffer: &[u8]) -> (Option<Frame>, usize) {
        Self::extract(buffer, TEXT_DEVICE_START)
    }

    fn decode_frame(&self, frame: &Frame) -> FrameResult<DecodedFields> {
        let result = Self::unwrap_line(frame, TEXT_DEVICE_START)
            .and_then(|body| body.split(',').map(parse_field).collect());
        if let Err(ref e) = result {
            debug!("text codec: dropping frame {:?}: {}", String::from_utf8_lossy(frame.as_bytes()), e);
        }
        result
    }

    fn encode_fields(&self, fields: &DecodedFields) -> Vec<u8> {
        let body = fields.iter().map(field_item).collect::<Vec<_>>().join(",");
        Self::frame_body(TEXT_DEVICE_START, &body)
    }

    fn try_extract_command(&self, buffer: &[u8]) -> (Option<Frame>, usize) {
        Self::extract(buffer, TEXT_HOST_START)
    }

    fn decode_command(&self, frame: &Frame) -> FrameResult<Command> {
        let body = Self::unwrap_line(frame, TEXT_HOST_START)?;
        let (mnemonic, arg) = match body.split_once('=') {
            Some((m, a)) => (m, Some(a)),
            None => (body, None),
        };
        let kind = CommandKind::from_mnemonic(mnemonic)
            .ok_or_else(|| FrameError::malformed(format!("unknown command: {:?}", mnemonic)))?;

        let command = match (kind, arg) {
            (CommandKind::SetTemperature, Some(a)) => Command::SetTemperature(parse_number(mnemonic, a)?),
            (CommandKind::SetRampRate, Some(a)) => Command::SetRampRate(parse_number(mnemonic, a)?),
            (CommandKind::SetContinuousOutput, Some("1")) => Command::SetContinuousOutput(true),
            (CommandKind::SetContinuousOutput, Some("0")) => Command::SetContinuousOutput(false),
            (CommandKind::Enable, None) => Command::Enable,
            (CommandKind::Disable, None) => Command::Disable,
            (CommandKind::ResetDefaults, None) => Command::ResetDefaults,
            (CommandKind::QueryStatus, None) => Command::QueryStatus,
            _ => return Err(FrameError::malformed(format!("bad arguments for {}", kind))),
        };
        Ok(command)
    }
}
