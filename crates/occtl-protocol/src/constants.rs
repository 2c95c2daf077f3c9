//! Protocol constants
//!
//! Accepted parameter ranges, factory defaults, and the framing markers used by
//! the bundled codecs.

// ============================================================================
// Parameter Ranges
// ============================================================================

/// Lowest setpoint the controller accepts, in °C.
pub const MIN_SETPOINT_C: f64 = 0.0;
/// Highest setpoint the controller accepts, in °C.
pub const MAX_SETPOINT_C: f64 = 300.0;
/// Slowest ramp rate the controller accepts, in °C/s.
pub const MIN_RAMP_RATE_C_PER_S: f64 = 0.01;
/// Fastest ramp rate the controller accepts, in °C/s.
pub const MAX_RAMP_RATE_C_PER_S: f64 = 100.0;

// ============================================================================
// Factory Defaults (restored by ResetDefaults)
// ============================================================================

/// Default setpoint after a reset, in °C.
pub const DEFAULT_SETPOINT_C: f64 = 40.0;
/// Default ramp rate after a reset, in °C/s.
pub const DEFAULT_RAMP_RATE_C_PER_S: f64 = 100.0;
/// Continuous output is off after a reset.
pub const DEFAULT_CONTINUOUS_OUTPUT: bool = false;
/// The heater output is disabled after a reset.
pub const DEFAULT_OUTPUT_ENABLED: bool = false;

// ============================================================================
// Text Framing
// ============================================================================

/// Start marker of a device → host text frame.
pub const TEXT_DEVICE_START: u8 = b'#';
/// Start marker of a host → device text frame.
pub const TEXT_HOST_START: u8 = b'$';
/// Separator between the body and the checksum.
pub const TEXT_CHECKSUM_SEPARATOR: u8 = b'*';
/// Frame terminator. A `\r` directly before it is tolerated and stripped.
pub const TEXT_TERMINATOR: u8 = b'\n';
/// Longest text frame, markers and terminator included.
pub const MAX_TEXT_FRAME_LEN: usize = 128;

// Field keys
pub const KEY_SETPOINT: &str = "SP";
pub const KEY_TEMPERATURE: &str = "PV";
pub const KEY_FAULT: &str = "FC";
pub const KEY_RAMP_RATE: &str = "RR";
pub const KEY_ACK: &str = "ACK";

// ============================================================================
// Binary Framing
// ============================================================================

/// Header byte of a device → host binary frame.
pub const BINARY_DEVICE_HEADER: u8 = b'>';
/// Header byte of a host → device binary frame.
pub const BINARY_HOST_HEADER: u8 = b'<';
/// Header byte plus 2-byte little-endian length.
pub const BINARY_PREFIX_LEN: usize = 3;
/// Trailing XOR checksum.
pub const BINARY_CHECKSUM_LEN: usize = 1;
/// Largest payload a binary frame may announce.
pub const MAX_BINARY_PAYLOAD: usize = 64;

// Field tags
pub const TAG_SETPOINT: u8 = 0x01;
pub const TAG_TEMPERATURE: u8 = 0x02;
pub const TAG_FAULT: u8 = 0x03;
pub const TAG_RAMP_RATE: u8 = 0x04;
pub const TAG_ACK: u8 = 0x05;

/// Fixed-point scale of binary temperatures and rates (milli-units).
pub const BINARY_FIXED_POINT_SCALE: f64 = 1000.0;
