//! OC Temperature Controller Session
//!
//! This crate drives one controller over a byte [`Transport`]. A [`Session`]
//! owns the transport and a codec from `occtl-protocol`, sends commands, and
//! folds the controller's status frames into [`SessionState`]:
//!
//! - **Polled mode**: [`Session::request_status`] sends a query and reads
//!   until one frame is applied or the poll budget runs out.
//! - **Continuous mode**: the controller streams frames and the caller
//!   calls [`Session::pump_incoming`] whenever convenient.
//!
//! Every reported value carries the instant it was observed. Fault code
//! transitions are queued with their detection time until the caller drains
//! them.
//!
//! # Example
//!
//! ```rust,ignore
//! use occtl_session::{Session, SessionConfig, SimulatedDevice, SimulatorConfig};
//!
//! let device = SimulatedDevice::new(SimulatorConfig::default());
//! let mut session = Session::open(SessionConfig::default(), device)?;
//! session.set_temperature(60.0)?;
//! session.enable()?;
//! let status = session.request_status()?;
//! println!("{:?}", status.temperature_c());
//! ```

mod config;
mod engine;
mod error;
mod simulator;
mod stability;
mod state;
mod transport;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use simulator::*;
pub use stability::*;
pub use state::*;
pub use transport::*;
