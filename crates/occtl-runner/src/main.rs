//! `occtl`: command-line control of OC temperature controllers.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use occtl_protocol::Framing;
use occtl_runner::monitor::{monitor, stabilize, MonitorOptions, StabilizeOptions};
use occtl_runner::report::{log_faults, StatusReport, WallClock};
use occtl_runner::{
    connect, connect_simulated, Connection, RunnerConfig, RunnerResult, SimulationClock,
    TransportConfig,
};
use occtl_session::StabilityCriteria;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "occtl", version, about = "Control an OC temperature controller")]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Connect to a serial-over-TCP bridge at HOST:PORT.
    #[arg(long, global = true, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Open a local serial port.
    #[arg(long, global = true)]
    serial: Option<String>,

    /// Serial baud rate.
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Frame grammar spoken by the controller.
    #[arg(long, global = true, value_enum)]
    framing: Option<FramingArg>,

    /// Name used in logs and metrics.
    #[arg(long, global = true)]
    device_name: Option<String>,

    /// Talk to the built-in simulated controller instead of hardware.
    #[arg(long, global = true)]
    simulate: bool,

    /// With --simulate, run simulated time as fast as possible.
    #[arg(long, global = true, requires = "simulate")]
    fast_forward: bool,

    /// Increase log verbosity.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Request one status frame and print it.
    Status {
        /// Print JSON instead of a summary line.
        #[arg(long)]
        json: bool,
    },
    /// Set the target temperature (°C).
    SetTemp { celsius: f64 },
    /// Set the ramp rate (°C/s).
    SetRamp { rate: f64 },
    /// Enable the heater output.
    Enable,
    /// Disable the heater output.
    Disable,
    /// Restore the controller defaults.
    Reset,
    /// Stream temperatures in continuous mode.
    Monitor {
        /// Write samples to this CSV file.
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Pause between receive passes (ms).
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Stop once the temperature reaches this value (°C).
        #[arg(long)]
        until: Option<f64>,
        /// Set this target before monitoring (°C).
        #[arg(long)]
        setpoint: Option<f64>,
        /// Set this ramp rate before monitoring (°C/s).
        #[arg(long)]
        ramp_rate: Option<f64>,
        /// Enable the output before monitoring.
        #[arg(long)]
        enable: bool,
        /// Stop after this many samples.
        #[arg(long)]
        max_samples: Option<usize>,
    },
    /// Drive to a target and wait until the temperature holds steady.
    Stabilize {
        /// Target temperature (°C).
        #[arg(long)]
        target: f64,
        /// Accepted deviation from the target (°C).
        #[arg(long, default_value_t = 0.1)]
        range: f64,
        /// How long the temperature must stay in range (s).
        #[arg(long, default_value_t = 20)]
        hold_secs: u64,
        /// Pause between status requests (ms).
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Give up after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Restore defaults and disable the output once stable.
        #[arg(long)]
        reset_after: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FramingArg {
    Delimited,
    LengthPrefixed,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::Delimited => Framing::Delimited,
            FramingArg::LengthPrefixed => Framing::LengthPrefixed,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// File config with command-line overrides applied.
fn load_config(cli: &Cli) -> RunnerResult<RunnerConfig> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };

    if let Some(address) = &cli.tcp {
        config.transport = Some(TransportConfig::tcp(address.clone()));
    } else if let Some(path) = &cli.serial {
        config.transport = Some(TransportConfig::serial(path.clone(), cli.baud));
    } else if let (Some(baud), Some(TransportConfig::Serial { baud: configured, .. })) =
        (cli.baud, config.transport.as_mut())
    {
        *configured = baud;
    }
    if let Some(framing) = cli.framing {
        config.session.framing = framing.into();
    }
    if let Some(name) = &cli.device_name {
        config.session.device_name = name.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli, running: Arc<AtomicBool>) -> RunnerResult<()> {
    let config = load_config(&cli)?;
    let Connection { mut session, mut pacer, .. } = if cli.simulate {
        let clock = if cli.fast_forward {
            SimulationClock::FastForward
        } else {
            SimulationClock::RealTime
        };
        connect_simulated(&config, clock)?
    } else {
        connect(&config)?
    };
    let clock = WallClock::start();

    match cli.command {
        Commands::Status { json } => {
            let snapshot = session.request_status()?;
            log_faults(&session.drain_faults(), &clock);
            let report = StatusReport::new(&snapshot, &clock);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
        }
        Commands::SetTemp { celsius } => {
            session.set_temperature(celsius)?;
            info!("setpoint {:.2} C sent", celsius);
        }
        Commands::SetRamp { rate } => {
            session.set_ramp_rate(rate)?;
            info!("ramp rate {:.2} C/s sent", rate);
        }
        Commands::Enable => {
            session.enable()?;
            info!("output enabled");
        }
        Commands::Disable => {
            session.disable()?;
            info!("output disabled");
        }
        Commands::Reset => {
            session.reset_defaults()?;
            info!("defaults restored");
        }
        Commands::Monitor {
            csv,
            interval_ms,
            until,
            setpoint,
            ramp_rate,
            enable,
            max_samples,
        } => {
            if let Some(setpoint) = setpoint {
                session.set_temperature(setpoint)?;
            }
            if let Some(rate) = ramp_rate {
                session.set_ramp_rate(rate)?;
            }
            if enable {
                session.enable()?;
            }

            let options = MonitorOptions {
                interval: Duration::from_millis(interval_ms),
                until,
                max_samples,
                ..Default::default()
            };
            let mut writer = match &csv {
                Some(path) => Some(BufWriter::new(File::create(path)?)),
                None => None,
            };
            let report = monitor(
                &mut session,
                &options,
                writer.as_mut().map(|w| w as &mut dyn Write),
                &running,
                &mut *pacer,
            )?;
            info!(
                "monitor finished: {} samples{}",
                report.samples.len(),
                if report.interrupted { " (interrupted)" } else { "" }
            );
        }
        Commands::Stabilize {
            target,
            range,
            hold_secs,
            interval_ms,
            timeout_secs,
            reset_after,
        } => {
            let options = StabilizeOptions {
                criteria: StabilityCriteria {
                    target,
                    range,
                    hold: Duration::from_secs(hold_secs),
                },
                interval: Duration::from_millis(interval_ms),
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let snapshot = stabilize(&mut session, &options, &running, &mut *pacer)?;
            println!("{}", StatusReport::new(&snapshot, &clock).summary());
            if reset_after {
                session.reset_defaults()?;
                session.disable()?;
            }
        }
    }

    session.disconnect();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    occtl_metrics::describe_metrics();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        error!("failed to install Ctrl-C handler: {}", e);
    }

    match run(cli, running) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
