//! Simulated OC controller.
//!
//! [`SimulatedDevice`] is a [`Transport`] that answers like a controller: it
//! decodes the host's command frames with the device-side codec operations,
//! tracks setpoint, ramp rate, and output state, moves its temperature toward
//! the setpoint at the commanded ramp rate, and replies with status frames
//! (one per `QueryStatus` in polled mode, periodic in continuous mode).
//!
//! Time is either the wall clock or a manual clock advanced by
//! `wait_readable` and [`SimHandle::advance`], which keeps tests
//! deterministic.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use occtl_protocol::{
    codec_for, Celsius, Command, DecodedFields, FaultCode, FrameCodec, Framing,
    DEFAULT_CONTINUOUS_OUTPUT, DEFAULT_OUTPUT_ENABLED, DEFAULT_RAMP_RATE_C_PER_S,
    DEFAULT_SETPOINT_C,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::transport::Transport;

/// Simulated device parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub framing: Framing,
    /// Starting and ambient temperature (°C).
    pub ambient_c: Celsius,
    /// Cooling rate toward ambient while the output is disabled (°C/s).
    pub cooling_rate_c_per_s: f64,
    /// Period of unsolicited frames in continuous mode (ms).
    pub report_interval_ms: u64,
    /// Peak-to-peak measurement noise (°C). Zero disables noise.
    pub noise_c: f64,
    /// Reply to state-affecting commands with an ack frame.
    pub acknowledge_commands: bool,
    /// Seed for the noise generator.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            framing: Framing::default(),
            ambient_c: 25.0,
            cooling_rate_c_per_s: 0.5,
            report_interval_ms: 250,
            noise_c: 0.0,
            acknowledge_commands: false,
            seed: 0x0C,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SimClock {
    Wall(Instant),
    Manual,
}

/// Controller model behind the transport.
struct DeviceModel {
    config: SimulatorConfig,
    codec: Box<dyn FrameCodec>,
    clock: SimClock,
    rng: ChaCha8Rng,

    setpoint: Celsius,
    temperature: Celsius,
    ramp_rate: f64,
    output_enabled: bool,
    continuous: bool,
    fault: FaultCode,
    since_report: Duration,

    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    received: Vec<Command>,
    link_failed: bool,
    closed: bool,
}

impl DeviceModel {
    fn new(config: SimulatorConfig, clock: SimClock) -> Self {
        let codec = codec_for(config.framing);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let temperature = config.ambient_c;
        DeviceModel {
            config,
            codec,
            clock,
            rng,
            setpoint: DEFAULT_SETPOINT_C,
            temperature,
            ramp_rate: DEFAULT_RAMP_RATE_C_PER_S,
            output_enabled: DEFAULT_OUTPUT_ENABLED,
            continuous: DEFAULT_CONTINUOUS_OUTPUT,
            fault: FaultCode::NONE,
            since_report: Duration::ZERO,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            received: Vec::new(),
            link_failed: false,
            closed: false,
        }
    }

    /// Advance the wall clock, if one is in use.
    fn sync_clock(&mut self) {
        if let SimClock::Wall(last) = self.clock {
            let now = Instant::now();
            self.clock = SimClock::Wall(now);
            self.step(now.saturating_duration_since(last));
        }
    }

    /// Advance the model by `dt`, emitting each continuous report at the
    /// temperature of its own instant.
    fn step(&mut self, dt: Duration) {
        if !self.continuous {
            self.integrate(dt);
            return;
        }

        let period = Duration::from_millis(self.config.report_interval_ms.max(1));
        let mut remaining = dt;
        while self.since_report + remaining >= period {
            let until_report = period.saturating_sub(self.since_report);
            self.integrate(until_report);
            remaining -= until_report;
            self.since_report = Duration::ZERO;
            self.emit_status();
        }
        self.integrate(remaining);
        self.since_report += remaining;
    }

    fn integrate(&mut self, dt: Duration) {
        let secs = dt.as_secs_f64();
        if self.output_enabled {
            let delta = self.setpoint - self.temperature;
            let max_step = self.ramp_rate * secs;
            self.temperature += delta.clamp(-max_step, max_step);
        } else if self.temperature > self.config.ambient_c {
            let cooled = self.temperature - self.config.cooling_rate_c_per_s * secs;
            self.temperature = cooled.max(self.config.ambient_c);
        }
    }

    fn measured_temperature(&mut self) -> Celsius {
        let noise = if self.config.noise_c > 0.0 {
            let half = self.config.noise_c / 2.0;
            self.rng.gen_range(-half..=half)
        } else {
            0.0
        };
        ((self.temperature + noise) * 100.0).round() / 100.0
    }

    fn emit_status(&mut self) {
        let fields = DecodedFields::new()
            .with_setpoint(self.setpoint)
            .with_temperature(self.measured_temperature())
            .with_fault(self.fault)
            .with_ramp_rate(self.ramp_rate);
        let bytes = self.codec.encode_fields(&fields);
        self.outbound.extend(bytes);
    }

    fn handle_bytes(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
        loop {
            let (frame, consumed) = self.codec.try_extract_command(&self.inbound);
            let Some(frame) = frame else { break };
            self.inbound.drain(..consumed);
            match self.codec.decode_command(&frame) {
                Ok(command) => self.handle_command(command),
                Err(e) => trace!("SimulatedDevice: ignoring command frame: {}", e),
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        trace!("SimulatedDevice: {:?}", command);
        self.received.push(command);
        match command {
            Command::SetTemperature(v) => self.setpoint = v,
            Command::SetRampRate(v) => self.ramp_rate = v,
            Command::Enable => self.output_enabled = true,
            Command::Disable => self.output_enabled = false,
            Command::SetContinuousOutput(on) => {
                self.continuous = on;
                self.since_report = Duration::ZERO;
            }
            Command::ResetDefaults => {
                self.setpoint = DEFAULT_SETPOINT_C;
                self.ramp_rate = DEFAULT_RAMP_RATE_C_PER_S;
                self.output_enabled = DEFAULT_OUTPUT_ENABLED;
                self.continuous = DEFAULT_CONTINUOUS_OUTPUT;
            }
            Command::QueryStatus => self.emit_status(),
        }

        if self.config.acknowledge_commands && command.is_state_affecting() {
            let ack = self.codec.encode_fields(&DecodedFields::new().with_ack(command.kind()));
            self.outbound.extend(ack);
        }
    }

    fn link_error(&self) -> Option<io::Error> {
        if self.link_failed {
            Some(io::Error::new(io::ErrorKind::BrokenPipe, "simulated link failure"))
        } else if self.closed {
            Some(io::Error::new(io::ErrorKind::NotConnected, "simulated device closed"))
        } else {
            None
        }
    }
}

/// A [`Transport`] backed by a simulated controller.
pub struct SimulatedDevice {
    model: Arc<Mutex<DeviceModel>>,
}

/// Inspection and fault-injection handle for a [`SimulatedDevice`].
#[derive(Clone)]
pub struct SimHandle {
    model: Arc<Mutex<DeviceModel>>,
}

impl SimulatedDevice {
    /// A device driven by the wall clock.
    pub fn new(config: SimulatorConfig) -> Self {
        Self::with_clock(config, SimClock::Wall(Instant::now()))
    }

    /// A device whose time only moves through `wait_readable` and
    /// [`SimHandle::advance`].
    pub fn manual(config: SimulatorConfig) -> Self {
        Self::with_clock(config, SimClock::Manual)
    }

    fn with_clock(config: SimulatorConfig, clock: SimClock) -> Self {
        SimulatedDevice {
            model: Arc::new(Mutex::new(DeviceModel::new(config, clock))),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            model: Arc::clone(&self.model),
        }
    }
}

impl SimHandle {
    /// Advance a manual clock. Has no effect on a wall-clock device.
    pub fn advance(&self, dt: Duration) {
        let mut model = self.model.lock();
        if let SimClock::Manual = model.clock {
            model.step(dt);
        }
    }

    pub fn temperature(&self) -> Celsius {
        self.model.lock().temperature
    }

    pub fn set_temperature(&self, celsius: Celsius) {
        self.model.lock().temperature = celsius;
    }

    pub fn setpoint(&self) -> Celsius {
        self.model.lock().setpoint
    }

    pub fn ramp_rate(&self) -> f64 {
        self.model.lock().ramp_rate
    }

    pub fn output_enabled(&self) -> bool {
        self.model.lock().output_enabled
    }

    pub fn continuous(&self) -> bool {
        self.model.lock().continuous
    }

    /// Set the reported fault code. `0` clears it.
    pub fn set_fault(&self, code: u8) {
        self.model.lock().fault = FaultCode(code);
    }

    /// Queue raw bytes ahead of the next status frame.
    pub fn inject_bytes(&self, bytes: &[u8]) {
        self.model.lock().outbound.extend(bytes.iter().copied());
    }

    /// Make every following read and write fail.
    pub fn fail_link(&self) {
        self.model.lock().link_failed = true;
    }

    /// Commands the device has decoded, in order.
    pub fn received(&self) -> Vec<Command> {
        self.model.lock().received.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.model.lock().closed
    }
}

impl Transport for SimulatedDevice {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut model = self.model.lock();
        if let Some(e) = model.link_error() {
            return Err(e);
        }
        model.sync_clock();
        model.handle_bytes(bytes);
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut model = self.model.lock();
        if let Some(e) = model.link_error() {
            return Err(e);
        }
        model.sync_clock();
        Ok(model.outbound.drain(..).collect())
    }

    fn close(&mut self) {
        self.model.lock().closed = true;
    }

    fn is_open(&self) -> bool {
        !self.model.lock().closed
    }

    fn wait_readable(&mut self, timeout: Duration) {
        let manual = matches!(self.model.lock().clock, SimClock::Manual);
        if manual {
            self.model.lock().step(timeout);
        } else {
            std::thread::sleep(timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn write_command(device: &mut SimulatedDevice, command: Command) {
        let codec = codec_for(Framing::Delimited);
        device.write(&codec.encode(&command).unwrap()).unwrap();
    }

    #[test]
    fn test_query_status_replies() {
        let mut device = SimulatedDevice::manual(SimulatorConfig::default());
        write_command(&mut device, Command::QueryStatus);

        let bytes = device.read_available().unwrap();
        let codec = codec_for(Framing::Delimited);
        let (frame, consumed) = codec.try_extract_frame(&bytes);
        assert_eq!(consumed, bytes.len());
        let fields = codec.decode_frame(&frame.unwrap()).unwrap();
        assert_eq!(fields.setpoint(), Some(DEFAULT_SETPOINT_C));
        assert_eq!(fields.temperature(), Some(25.0));
        assert_eq!(fields.fault(), Some(FaultCode::NONE));
    }

    #[test]
    fn test_ramps_at_commanded_rate() {
        let mut device = SimulatedDevice::manual(SimulatorConfig::default());
        let handle = device.handle();
        write_command(&mut device, Command::SetTemperature(80.0));
        write_command(&mut device, Command::SetRampRate(0.5));
        write_command(&mut device, Command::Enable);

        handle.advance(Duration::from_secs(10));
        assert_relative_eq!(handle.temperature(), 30.0, epsilon = 1e-9);

        handle.advance(Duration::from_secs(1000));
        assert_relative_eq!(handle.temperature(), 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cools_when_disabled() {
        let device = SimulatedDevice::manual(SimulatorConfig::default());
        let handle = device.handle();
        handle.set_temperature(30.0);

        handle.advance(Duration::from_secs(4));
        assert_relative_eq!(handle.temperature(), 28.0, epsilon = 1e-9);
        handle.advance(Duration::from_secs(60));
        assert_relative_eq!(handle.temperature(), 25.0);
    }

    #[test]
    fn test_continuous_reports() {
        let mut device = SimulatedDevice::manual(SimulatorConfig::default());
        write_command(&mut device, Command::SetContinuousOutput(true));
        device.wait_readable(Duration::from_millis(1000));

        let bytes = device.read_available().unwrap();
        let codec = codec_for(Framing::Delimited);
        let (frames, rest) = occtl_protocol::extract_all(&bytes, |b| codec.try_extract_frame(b));
        assert_eq!(frames.len(), 4);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_reset_defaults() {
        let mut device = SimulatedDevice::manual(SimulatorConfig::default());
        let handle = device.handle();
        write_command(&mut device, Command::SetTemperature(150.0));
        write_command(&mut device, Command::SetContinuousOutput(true));
        write_command(&mut device, Command::ResetDefaults);

        assert_eq!(handle.setpoint(), DEFAULT_SETPOINT_C);
        assert!(!handle.continuous());
        assert_eq!(handle.received().len(), 3);
    }

    #[test]
    fn test_link_failure() {
        let mut device = SimulatedDevice::manual(SimulatorConfig::default());
        device.handle().fail_link();
        assert!(device.read_available().is_err());
        assert!(device.write(b"$QS*00\r\n").is_err());
    }

    #[test]
    fn test_noise_is_seeded() {
        let config = SimulatorConfig { noise_c: 0.2, ..Default::default() };
        let readings = |config: &SimulatorConfig| {
            let mut device = SimulatedDevice::manual(config.clone());
            (0..5)
                .map(|_| {
                    write_command(&mut device, Command::QueryStatus);
                    device.read_available().unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(readings(&config), readings(&config));
    }
}
