//! Length-prefixed binary codec.
//!
//! ```text
//! +--------+--------+--------+-------------------+-----+
//! | header | len_lo | len_hi | payload[0..len]   | xor |
//! +--------+--------+--------+-------------------+-----+
//! ```
//!
//! The header is `>` for device → host frames and `<` for host → device
//! frames. `xor` is the XOR of the payload bytes.
//!
//! Device payloads are a list of tagged fields. Temperatures and rates are
//! signed 32-bit little-endian milli-units. Commands are an opcode byte
//! followed by an optional argument.

use bytes::{Buf, BufMut};
use log::debug;

use crate::codec::{leading_noise, xor_checksum, Frame, FrameCodec, Framing};
use crate::commands::{Command, CommandKind};
use crate::constants::*;
use crate::error::{FrameError, FrameResult, ProtocolError};
use crate::fields::{DecodedFields, FaultCode, FieldUpdate};

/// Codec for the length-prefixed binary grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

fn to_fixed(value: f64) -> i32 {
    (value * BINARY_FIXED_POINT_SCALE).round() as i32
}

fn from_fixed(value: i32) -> f64 {
    value as f64 / BINARY_FIXED_POINT_SCALE
}

impl BinaryCodec {
    pub fn new() -> Self {
        BinaryCodec
    }

    /// Wrap a payload with header, length prefix, and checksum.
    ///
    /// `payload` must not exceed [`MAX_BINARY_PAYLOAD`]; the extractor rejects
    /// longer frames.
    pub fn frame_payload(header: u8, payload: &[u8]) -> Vec<u8> {
        debug_assert!(
            payload.len() <= MAX_BINARY_PAYLOAD,
            "payload of {} bytes exceeds {}",
            payload.len(),
            MAX_BINARY_PAYLOAD
        );
        let mut buf = Vec::with_capacity(BINARY_PREFIX_LEN + payload.len() + BINARY_CHECKSUM_LEN);
        buf.put_u8(header);
        buf.put_u16_le(payload.len() as u16);
        buf.put_slice(payload);
        buf.put_u8(xor_checksum(payload));
        buf
    }

    fn extract(buffer: &[u8], header: u8) -> (Option<Frame>, usize) {
        if let Some(noise) = leading_noise(buffer, header) {
            return (Some(Frame::from(&buffer[..noise])), noise);
        }

        if buffer.len() < BINARY_PREFIX_LEN {
            return (None, 0);
        }

        let len = u16::from_le_bytes([buffer[1], buffer[2]]) as usize;
        if len > MAX_BINARY_PAYLOAD {
            // Corrupt length: drop the header byte and resynchronise.
            return (Some(Frame::from(&buffer[..1])), 1);
        }

        let total = BINARY_PREFIX_LEN + len + BINARY_CHECKSUM_LEN;
        if buffer.len() < total {
            return (None, 0);
        }

        (Some(Frame::from(&buffer[..total])), total)
    }

    /// Check header, length, and checksum, returning the payload.
    fn unwrap_payload(frame: &Frame, header: u8) -> FrameResult<&[u8]> {
        let bytes = frame.as_bytes();
        if bytes.len() < BINARY_PREFIX_LEN + BINARY_CHECKSUM_LEN {
            return Err(FrameError::malformed(format!("frame too short: {} bytes", bytes.len())));
        }
        if bytes[0] != header {
            return Err(FrameError::malformed(format!("bad header 0x{:02X}", bytes[0])));
        }

        let len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
        if bytes.len() != BINARY_PREFIX_LEN + len + BINARY_CHECKSUM_LEN {
            return Err(FrameError::malformed(format!(
                "length mismatch: header says {}, frame holds {}",
                len,
                bytes.len() - BINARY_PREFIX_LEN - BINARY_CHECKSUM_LEN
            )));
        }

        let payload = &bytes[BINARY_PREFIX_LEN..BINARY_PREFIX_LEN + len];
        let checksum = bytes[bytes.len() - 1];
        if checksum != xor_checksum(payload) {
            return Err(FrameError::malformed(format!(
                "checksum mismatch: got 0x{:02X}, expected 0x{:02X}",
                checksum,
                xor_checksum(payload)
            )));
        }
        if payload.is_empty() {
            return Err(FrameError::malformed("empty payload"));
        }
        Ok(payload)
    }

    fn parse_fields(mut payload: &[u8]) -> FrameResult<DecodedFields> {
        let mut fields = DecodedFields::new();
        while payload.has_remaining() {
            let tag = payload.get_u8();
            let update = match tag {
                TAG_SETPOINT | TAG_TEMPERATURE | TAG_RAMP_RATE => {
                    if payload.remaining() < 4 {
                        return Err(FrameError::malformed(format!("truncated field 0x{:02X}", tag)));
                    }
                    let value = from_fixed(payload.get_i32_le());
                    match tag {
                        TAG_SETPOINT => FieldUpdate::Setpoint(value),
                        TAG_TEMPERATURE => FieldUpdate::Temperature(value),
                        _ => FieldUpdate::RampRate(value),
                    }
                }
                TAG_FAULT | TAG_ACK => {
                    if !payload.has_remaining() {
                        return Err(FrameError::malformed(format!("truncated field 0x{:02X}", tag)));
                    }
                    let value = payload.get_u8();
                    if tag == TAG_FAULT {
                        FieldUpdate::Fault(FaultCode(value))
                    } else {
                        let kind = CommandKind::from_opcode(value).ok_or_else(|| {
                            FrameError::malformed(format!("unknown ack opcode 0x{:02X}", value))
                        })?;
                        FieldUpdate::Ack(kind)
                    }
                }
                _ => return Err(FrameError::malformed(format!("unknown tag 0x{:02X}", tag))),
            };
            fields.push(update);
        }
        Ok(fields)
    }
}

impl FrameCodec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn framing(&self) -> Framing {
        Framing::LengthPrefixed
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>, ProtocolError> {
        command.validate()?;
        let mut payload = Vec::with_capacity(5);
        payload.put_u8(command.kind().opcode());
        match *command {
            Command::SetTemperature(value) | Command::SetRampRate(value) => {
                payload.put_i32_le(to_fixed(value));
            }
            Command::SetContinuousOutput(on) => payload.put_u8(u8::from(on)),
            _ => {}
        }
        Ok(Self::frame_payload(BINARY_HOST_HEADER, &payload))
    }

    fn quantize(&self, command: &Command) -> Command {
        command.map_argument(|value| from_fixed(to_fixed(value)))
    }

    fn try_extract_frame(&self, buffer: &[u8]) -> (Option<Frame>, usize) {
        Self::extract(buffer, BINARY_DEVICE_HEADER)
    }

    fn decode_frame(&self, frame: &Frame) -> FrameResult<DecodedFields> {
        let result = Self::unwrap_payload(frame, BINARY_DEVICE_HEADER).and_then(Self::parse_fields);
        if let Err(ref e) = result {
            debug!("binary codec: dropping {}-byte frame: {}", frame.len(), e);
        }
        result
    }

    fn encode_fields(&self, fields: &DecodedFields) -> Vec<u8> {
        let mut payload = Vec::with_capacity(MAX_BINARY_PAYLOAD);
        for (i, update) in fields.iter().enumerate() {
            let mut item = Vec::with_capacity(5);
            match *update {
                FieldUpdate::Setpoint(v) => {
                    item.put_u8(TAG_SETPOINT);
                    item.put_i32_le(to_fixed(v));
                }
                FieldUpdate::Temperature(v) => {
                    item.put_u8(TAG_TEMPERATURE);
                    item.put_i32_le(to_fixed(v));
                }
                FieldUpdate::RampRate(v) => {
                    item.put_u8(TAG_RAMP_RATE);
                    item.put_i32_le(to_fixed(v));
                }
                FieldUpdate::Fault(code) => {
                    item.put_u8(TAG_FAULT);
                    item.put_u8(code.0);
                }
                FieldUpdate::Ack(kind) => {
                    item.put_u8(TAG_ACK);
                    item.put_u8(kind.opcode());
                }
            }
            if payload.len() + item.len() > MAX_BINARY_PAYLOAD {
                debug!("binary codec: dropping {} fields past the payload limit", fields.len() - i);
                break;
            }
            payload.put_slice(&item);
        }
        Self::frame_payload(BINARY_DEVICE_HEADER, &payload)
    }

    fn try_extract_command(&self, buffer: &[u8]) -> (Option<Frame>, usize) {
        Self::extract(buffer, BINARY_HOST_HEADER)
    }

    fn decode_command(&self, frame: &Frame) -> FrameResult<Command> {
        let mut payload = Self::unwrap_payload(frame, BINARY_HOST_HEADER)?;
        let opcode = payload.get_u8();
        let kind = CommandKind::from_opcode(opcode)
            .ok_or_else(|| FrameError::malformed(format!("unknown opcode 0x{:02X}", opcode)))?;

        let command = match (kind, payload.remaining()) {
            (CommandKind::SetTemperature, 4) => Command::SetTemperature(from_fixed(payload.get_i32_le())),
            (CommandKind::SetRampRate, 4) => Command::SetRampRate(from_fixed(payload.get_i32_le())),
            (CommandKind::SetContinuousOutput, 1) => Command::SetContinuousOutput(payload.get_u8() != 0),
            (CommandKind::Enable, 0) => Command::Enable,
            (CommandKind::Disable, 0) => Command::Disable,
            (CommandKind::ResetDefaults, 0) => Command::ResetDefaults,
            (CommandKind::QueryStatus, 0) => Command::QueryStatus,
            _ => return Err(FrameError::malformed(format!("bad arguments for {}", kind))),
        };
        Ok(command)
    }
}
