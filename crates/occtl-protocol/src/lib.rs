//! OC Temperature Controller Protocol
//!
//! This crate provides the command and frame types used to talk to an OC-range
//! temperature controller over a serial link. It knows nothing about I/O: every
//! function here is a pure translation between typed values and bytes.
//!
//! # Protocol Overview
//!
//! The controller accepts short commands from the host and reports state back
//! as status frames. A status frame may carry any combination of:
//!
//! - **Setpoint**: the target temperature the controller acknowledged
//! - **Temperature**: the measured process temperature
//! - **Fault code**: `0` when healthy, a non-zero code otherwise
//! - **Ramp rate**: the active ramp rate
//! - **Ack**: the mnemonic of a command the controller accepted
//!
//! The byte grammar is a pluggable [`FrameCodec`] strategy. Two are provided:
//!
//! - [`TextCodec`]: checksummed ASCII records terminated by a newline
//! - [`BinaryCodec`]: length-prefixed tag/value records
//!
//! # Example
//!
//! ```rust,ignore
//! use occtl_protocol::{Command, FrameCodec, TextCodec};
//!
//! let codec = TextCodec::new();
//! let bytes = codec.encode(&Command::SetTemperature(60.0))?;
//!
//! let (frame, consumed) = codec.try_extract_frame(&received);
//! if let Some(frame) = frame {
//!     let fields = codec.decode_frame(&frame)?;
//! }
//! ```

mod binary;
mod codec;
mod commands;
mod constants;
mod error;
mod fields;
mod text;

pub use binary::*;
pub use codec::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use fields::*;
pub use text::*;
