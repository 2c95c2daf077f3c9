//! Continuous-mode monitoring and polled stability waits.
//!
//! Both loops run in the caller's thread. Pacing goes through a [`Pacer`] so
//! the same loops drive a real controller (wall clock, real sleeps) or a
//! simulated one (manual clock).

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use occtl_protocol::Celsius;
use occtl_session::{
    Session, SimHandle, Stability, StabilityCriteria, StabilityMonitor, StatusSnapshot,
};
use tracing::{debug, info};

use crate::error::{RunnerError, RunnerResult};
use crate::report::{log_faults, WallClock};

/// Header of the monitor CSV.
pub const CSV_HEADER: &str = "time,elapsed_s,temperature_c";

// ============================================================================
// Pacing
// ============================================================================

/// Time source and pause for the runner's loops.
pub trait Pacer {
    fn now(&self) -> Instant;
    fn pause(&mut self, interval: Duration);
}

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallPacer;

impl Pacer for WallPacer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn pause(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Simulated time: pausing advances a manual-clock simulated controller.
pub struct SimulatedPacer {
    device: SimHandle,
    origin: Instant,
    elapsed: Duration,
}

impl SimulatedPacer {
    pub fn new(device: SimHandle) -> Self {
        SimulatedPacer {
            device,
            origin: Instant::now(),
            elapsed: Duration::ZERO,
        }
    }
}

impl Pacer for SimulatedPacer {
    fn now(&self) -> Instant {
        self.origin + self.elapsed
    }

    fn pause(&mut self, interval: Duration) {
        self.device.advance(interval);
        self.elapsed += interval;
    }
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Pause between receive passes.
    pub interval: Duration,
    /// Stop once the temperature reaches this value.
    pub until: Option<Celsius>,
    /// Stop after this many samples.
    pub max_samples: Option<usize>,
    /// Restore controller defaults when the loop ends.
    pub reset_on_exit: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        MonitorOptions {
            interval: Duration::from_millis(100),
            until: None,
            max_samples: None,
            reset_on_exit: true,
        }
    }
}

/// One temperature observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub elapsed_s: f64,
    pub temperature: Celsius,
}

#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    pub samples: Vec<Sample>,
    pub interrupted: bool,
}

impl MonitorReport {
    /// Least-squares slope of temperature over time (°C/s).
    pub fn fitted_ramp_rate(&self) -> Option<f64> {
        fit_slope(&self.samples)
    }
}

/// Least-squares slope through the samples. `None` for fewer than two
/// distinct times.
pub fn fit_slope(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean_t = samples.iter().map(|s| s.elapsed_s).sum::<f64>() / n;
    let mean_y = samples.iter().map(|s| s.temperature).sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for s in samples {
        let dt = s.elapsed_s - mean_t;
        sxy += dt * (s.temperature - mean_y);
        sxx += dt * dt;
    }
    (sxx > 0.0).then(|| sxy / sxx)
}

/// Switch the controller to continuous output and record every temperature
/// frame, one sample per frame, until a stop condition or `running` clears.
///
/// Rows written to `csv` are `time,elapsed_s,temperature_c`.
pub fn monitor(
    session: &mut Session,
    options: &MonitorOptions,
    mut csv: Option<&mut dyn Write>,
    running: &AtomicBool,
    pacer: &mut dyn Pacer,
) -> RunnerResult<MonitorReport> {
    let clock = WallClock::start();
    if let Some(out) = csv.as_deref_mut() {
        writeln!(out, "{}", CSV_HEADER)?;
    }

    session.set_continuous_output(true)?;
    info!("monitoring {} in continuous mode", session.config().device_name);

    let mut report = MonitorReport::default();
    let mut first_at: Option<Instant> = None;

    'receive: loop {
        if !running.load(Ordering::SeqCst) {
            report.interrupted = true;
            break;
        }
        if options.max_samples.is_some_and(|max| report.samples.len() >= max) {
            break;
        }

        let mut readings: Vec<(Celsius, Instant)> = Vec::new();
        session.pump_incoming_with(|fields, at| readings.extend(fields.temperature().map(|t| (t, at))))?;
        log_faults(&session.drain_faults(), &clock);

        // Frames that arrived together share the pass's arrival time.
        let now = pacer.now();
        for (temperature, observed_at) in readings {
            let origin = *first_at.get_or_insert(now);
            let elapsed_s = now.saturating_duration_since(origin).as_secs_f64();
            report.samples.push(Sample { elapsed_s, temperature });

            if let Some(out) = csv.as_deref_mut() {
                writeln!(
                    out,
                    "{},{:.3},{:.3}",
                    clock.wall_time(observed_at).to_rfc3339(),
                    elapsed_s,
                    temperature
                )?;
            }
            debug!("temperature {:.3} C at {:.3} s", temperature, elapsed_s);

            if options.until.is_some_and(|until| temperature >= until)
                || options.max_samples.is_some_and(|max| report.samples.len() >= max)
            {
                break 'receive;
            }
        }

        pacer.pause(options.interval);
    }

    if let Some(out) = csv.as_deref_mut() {
        out.flush()?;
    }
    if options.reset_on_exit && session.is_connected() {
        session.reset_defaults()?;
    }
    if let Some(rate) = report.fitted_ramp_rate() {
        info!("{} samples, fitted ramp rate {:.4} C/s", report.samples.len(), rate);
    }
    Ok(report)
}

// ============================================================================
// Stabilize
// ============================================================================

#[derive(Debug, Clone)]
pub struct StabilizeOptions {
    pub criteria: StabilityCriteria,
    /// Pause between status requests.
    pub interval: Duration,
    /// Give up after this long.
    pub timeout: Option<Duration>,
}

/// Set the target, enable the output, and poll until the temperature has held
/// within range for the hold time.
///
/// Returns the last snapshot, taken once stable.
pub fn stabilize(
    session: &mut Session,
    options: &StabilizeOptions,
    running: &AtomicBool,
    pacer: &mut dyn Pacer,
) -> RunnerResult<StatusSnapshot> {
    let clock = WallClock::start();
    session.set_temperature(options.criteria.target)?;
    session.enable()?;

    let mut monitor = StabilityMonitor::new(options.criteria);
    let started = pacer.now();
    while running.load(Ordering::SeqCst) {
        let elapsed = pacer.now().saturating_duration_since(started);
        if options.timeout.is_some_and(|limit| elapsed > limit) {
            return Err(RunnerError::NotStable(elapsed));
        }

        let snapshot = session.request_status()?;
        log_faults(&session.drain_faults(), &clock);

        if let Some(temperature) = snapshot.temperature_c() {
            match monitor.observe(temperature, pacer.now()) {
                Stability::Stable { in_range_for } => {
                    info!(
                        "temperature stable within {:.3} C of {:.2} C for {:.1} s",
                        options.criteria.range,
                        options.criteria.target,
                        in_range_for.as_secs_f64()
                    );
                    return Ok(snapshot);
                }
                Stability::Settling { in_range_for } => {
                    debug!("{:.3} C, in range for {:.1} s", temperature, in_range_for.as_secs_f64())
                }
                Stability::OutOfRange { deviation } => {
                    debug!("{:.3} C, {:+.3} C from target", temperature, deviation)
                }
            }
        }
        pacer.pause(options.interval);
    }

    let elapsed = pacer.now().saturating_duration_since(started);
    Err(RunnerError::NotStable(elapsed))
}
