//! Runner support for the `occtl` binary: configuration, concrete transports,
//! and the monitoring and stability loops.

pub mod config;
pub mod error;
pub mod monitor;
pub mod report;
pub mod serial;
pub mod tcp;

use occtl_session::{Session, SimHandle, SimulatedDevice, Transport};
use tracing::info;

pub use config::{RunnerConfig, TransportConfig};
pub use error::{RunnerError, RunnerResult};
pub use monitor::{Pacer, SimulatedPacer, WallPacer};
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// How time passes for a simulated controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationClock {
    /// The simulated controller follows the wall clock.
    RealTime,
    /// Simulated time only moves when the runner pauses, so waits complete
    /// instantly.
    FastForward,
}

/// An open session plus the pacer its loops should use.
pub struct Connection {
    pub session: Session,
    pub pacer: Box<dyn Pacer>,
    /// Present when the transport is the simulated controller.
    pub simulator: Option<SimHandle>,
}

/// Open the transport `config` names and connect a session to it.
pub fn connect(config: &RunnerConfig) -> RunnerResult<Connection> {
    let transport = config
        .transport
        .as_ref()
        .ok_or_else(|| {
            RunnerError::Config("no transport configured (use --tcp, --serial, or --simulate)".to_string())
        })?;

    match transport {
        TransportConfig::Tcp { address, .. } => {
            let tcp = TcpTransport::connect(address, transport.connect_timeout())?;
            info!("connected to {} over TCP", address);
            open(config, tcp)
        }
        TransportConfig::Serial { path, baud } => {
            let port = SerialTransport::open(path, *baud)?;
            info!("opened serial port {} at {} baud", path, baud);
            open(config, port)
        }
        TransportConfig::Simulated => connect_simulated(config, SimulationClock::RealTime),
    }
}

/// Connect a session to a simulated controller.
pub fn connect_simulated(config: &RunnerConfig, clock: SimulationClock) -> RunnerResult<Connection> {
    let mut sim_config = config.simulator.clone();
    sim_config.framing = config.session.framing;
    info!("using simulated controller ({:?})", clock);

    let (device, pacer): (SimulatedDevice, Box<dyn Pacer>) = match clock {
        SimulationClock::RealTime => (SimulatedDevice::new(sim_config), Box::new(WallPacer)),
        SimulationClock::FastForward => {
            let device = SimulatedDevice::manual(sim_config);
            let pacer: Box<dyn Pacer> = Box::new(SimulatedPacer::new(device.handle()));
            (device, pacer)
        }
    };
    let handle = device.handle();
    let session = Session::open(config.session.clone(), device)?;
    Ok(Connection { session, pacer, simulator: Some(handle) })
}

fn open<T: Transport + 'static>(config: &RunnerConfig, transport: T) -> RunnerResult<Connection> {
    let session = Session::open(config.session.clone(), transport)?;
    Ok(Connection { session, pacer: Box::new(WallPacer), simulator: None })
}
