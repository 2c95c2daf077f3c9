//! The pluggable frame codec strategy.
//!
//! A codec owns the byte grammar of one controller family. The session engine
//! only relies on the contract below:
//!
//! - [`FrameCodec::try_extract_frame`] looks at the start of a receive buffer
//!   and either returns one complete frame with the number of bytes it spanned,
//!   or `(None, 0)` when more data is needed. It never consumes bytes of an
//!   incomplete frame, so calling it again with a longer buffer is always safe.
//! - [`FrameCodec::decode_frame`] turns a complete frame into field updates or
//!   [`FrameError::Malformed`].
//!
//! Bytes that can never start a frame (line noise, a truncated frame after a
//! reset) are handed back as a frame of their own. It fails to decode and is
//! dropped, which keeps `(None, 0)` reserved for "a complete frame may still
//! arrive".

use serde::{Deserialize, Serialize};

use crate::binary::BinaryCodec;
use crate::commands::Command;
use crate::error::{FrameResult, ProtocolError};
use crate::fields::DecodedFields;
use crate::text::TextCodec;

/// Framing rule of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Start marker, body, terminator byte ([`TextCodec`]).
    #[default]
    Delimited,
    /// Header byte, 2-byte length, payload, checksum ([`BinaryCodec`]).
    LengthPrefixed,
}

impl Framing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framing::Delimited => "delimited",
            Framing::LengthPrefixed => "length_prefixed",
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete, self-delimited unit of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Frame { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Frame::new(bytes.to_vec())
    }
}

/// A byte grammar for one controller family.
pub trait FrameCodec: Send {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// The framing rule this codec implements.
    fn framing(&self) -> Framing;

    /// Encode a host → device command. Fails before producing any bytes if an
    /// argument is out of range.
    fn encode(&self, command: &Command) -> Result<Vec<u8>, ProtocolError>;

    /// `command` as the controller will read it back: numeric arguments
    /// rounded to the precision this codec writes.
    fn quantize(&self, command: &Command) -> Command;

    /// Extract one device → host frame from the start of `buffer`.
    fn try_extract_frame(&self, buffer: &[u8]) -> (Option<Frame>, usize);

    /// Decode a device → host frame.
    fn decode_frame(&self, frame: &Frame) -> FrameResult<DecodedFields>;

    /// Build the device → host frame carrying `fields`.
    fn encode_fields(&self, fields: &DecodedFields) -> Vec<u8>;

    /// Extract one host → device frame from the start of `buffer`.
    fn try_extract_command(&self, buffer: &[u8]) -> (Option<Frame>, usize);

    /// Decode a host → device frame.
    fn decode_command(&self, frame: &Frame) -> FrameResult<Command>;
}

/// Create the codec for a framing rule.
pub fn codec_for(framing: Framing) -> Box<dyn FrameCodec> {
    match framing {
        Framing::Delimited => Box::new(TextCodec::new()),
        Framing::LengthPrefixed => Box::new(BinaryCodec::new()),
    }
}

/// If `buffer` does not begin with `start`, the length of the noise run up to
/// the next `start` byte (or the whole buffer).
pub(crate) fn leading_noise(buffer: &[u8], start: u8) -> Option<usize> {
    match buffer.first() {
        Some(&b) if b != start => {
            let end = buffer.iter().position(|&b| b == start).unwrap_or(buffer.len());
            Some(end)
        }
        _ => None,
    }
}

/// XOR of all bytes.
pub(crate) fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Split `buffer` into frames with `extract`, the way a receive loop does.
///
/// Returns the frames and the residual partial prefix.
pub fn extract_all<F>(buffer: &[u8], mut extract: F) -> (Vec<Frame>, &[u8])
where
    F: FnMut(&[u8]) -> (Option<Frame>, usize),
{
    let mut frames = Vec::new();
    let mut rest = buffer;
    loop {
        match extract(rest) {
            (Some(frame), consumed) => {
                frames.push(frame);
                rest = &rest[consumed..];
            }
            (None, _) => return (frames, rest),
        }
    }
}
