//! Protocol engine.
//!
//! A [`Session`] owns one transport and one codec. Outgoing commands are
//! validated and encoded by the codec and written to the transport. Incoming
//! bytes are appended to a receive buffer, split into frames, decoded, and
//! applied to [`SessionState`] in arrival order.
//!
//! ```text
//!  Disconnected --connect--> Connected(Polled) <--set_continuous_output--> Connected(Continuous)
//!        ^                          |                                              |
//!        +------ disconnect / transport failure -----------------------------------+
//! ```
//!
//! The engine never sleeps and never spawns threads. `pump_incoming` does one
//! non-blocking read; `request_status` makes a bounded number of reads and
//! delegates pacing to [`Transport::wait_readable`].

use std::time::Instant;

use bytes::{Buf, BytesMut};
use occtl_metrics::{metric_defs, metrics, MetricLabels};
use occtl_protocol::{codec_for, Celsius, Command, CommandKind, DecodedFields, FrameCodec, Framing};
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::state::{
    CommandedValues, ConnectionState, FaultEvent, FaultQueue, OperatingMode, SessionState,
    StatusSnapshot, TimestampedValue,
};
use crate::transport::Transport;

/// A session with one controller.
pub struct Session {
    config: SessionConfig,
    codec: Box<dyn FrameCodec>,
    transport: Option<Box<dyn Transport>>,
    mode: OperatingMode,
    state: SessionState,
    commanded: CommandedValues,
    rx_buffer: BytesMut,
    labels: MetricLabels,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.config.device_name)
            .field("codec", &self.codec.name())
            .field("connected", &self.transport.is_some())
            .field("mode", &self.mode)
            .field("buffered", &self.rx_buffer.len())
            .finish()
    }
}

impl Session {
    /// Create a disconnected session using the codec `config.framing` selects.
    pub fn new(config: SessionConfig) -> Self {
        let codec = codec_for(config.framing);
        Self::with_codec(config, codec)
    }

    /// Create a disconnected session with an explicit codec.
    pub fn with_codec(config: SessionConfig, codec: Box<dyn FrameCodec>) -> Self {
        let labels = MetricLabels::new(config.device_name.clone(), codec.framing().as_str());
        Session {
            config,
            codec,
            transport: None,
            mode: OperatingMode::Polled,
            state: SessionState::new(),
            commanded: CommandedValues::default(),
            rx_buffer: BytesMut::with_capacity(256),
            labels,
        }
    }

    /// Create a session and connect it to `transport`.
    pub fn open<T: Transport + 'static>(config: SessionConfig, transport: T) -> SessionResult<Self> {
        let mut session = Session::new(config);
        session.connect(transport)?;
        Ok(session)
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Take ownership of `transport` and enter `Connected(Polled)` with every
    /// value unknown and an empty fault queue.
    ///
    /// A session that is already connected releases its old transport first.
    pub fn connect<T: Transport + 'static>(&mut self, transport: T) -> SessionResult<()> {
        if !transport.is_open() {
            return Err(SessionError::Connect(format!(
                "transport for {} is not open",
                self.config.device_name
            )));
        }
        if self.transport.is_some() {
            self.disconnect();
        }

        self.state = SessionState::new();
        self.commanded = CommandedValues::default();
        self.mode = OperatingMode::Polled;
        self.rx_buffer.clear();
        self.transport = Some(Box::new(transport));

        debug!(
            "Session[{}]: connected ({} codec)",
            self.config.device_name,
            self.codec.name()
        );
        Ok(())
    }

    /// Close the transport and discard reported values. Pending fault events
    /// stay available to `drain_faults`. Calling this again has no effect.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            self.state.clear_values();
            self.rx_buffer.clear();
            self.mode = OperatingMode::Polled;
            debug!("Session[{}]: disconnected", self.config.device_name);
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.transport.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Validate, encode, and write one command.
    ///
    /// Success means the transport accepted the bytes, not that the
    /// controller complied. Reported state is left untouched; commanded
    /// values and the operating mode follow the command.
    pub fn send_command(&mut self, command: Command) -> SessionResult<()> {
        if self.transport.is_none() {
            return Err(SessionError::NotConnected);
        }

        let bytes = match self.codec.encode(&command) {
            Ok(bytes) => bytes,
            Err(e) => {
                metrics::counter!(
                    metric_defs::COMMANDS_REJECTED.name,
                    &self.labels.with(&[("command", command.kind().mnemonic().to_string())])
                )
                .increment(1);
                debug!("Session[{}]: rejected {:?}: {}", self.config.device_name, command, e);
                return Err(e.into());
            }
        };

        self.write(&bytes)?;

        trace!(
            "Session[{}]: sent {:?} ({} bytes)",
            self.config.device_name,
            command,
            bytes.len()
        );
        metrics::counter!(
            metric_defs::COMMANDS_SENT.name,
            &self.labels.with(&[("command", command.kind().mnemonic().to_string())])
        )
        .increment(1);

        self.commanded.record(&self.codec.quantize(&command));
        match command {
            Command::SetContinuousOutput(true) => self.mode = OperatingMode::Continuous,
            Command::SetContinuousOutput(false) | Command::ResetDefaults => {
                self.mode = OperatingMode::Polled
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_temperature(&mut self, celsius: Celsius) -> SessionResult<()> {
        self.send_command(Command::SetTemperature(celsius))
    }

    pub fn set_ramp_rate(&mut self, celsius_per_second: f64) -> SessionResult<()> {
        self.send_command(Command::SetRampRate(celsius_per_second))
    }

    pub fn enable(&mut self) -> SessionResult<()> {
        self.send_command(Command::Enable)
    }

    pub fn disable(&mut self) -> SessionResult<()> {
        self.send_command(Command::Disable)
    }

    /// Switch unsolicited status output on or off and change mode to match.
    /// Nothing is read.
    pub fn set_continuous_output(&mut self, enabled: bool) -> SessionResult<()> {
        self.send_command(Command::SetContinuousOutput(enabled))
    }

    /// Restore the controller's defaults and return to polled mode.
    ///
    /// Reported values and the fault queue are untouched.
    pub fn reset_defaults(&mut self) -> SessionResult<()> {
        self.send_command(Command::ResetDefaults)
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Send `QueryStatus` and read until one frame is applied.
    ///
    /// Makes at most `status_poll_attempts` reads, calling the transport's
    /// pacing hook between them. Malformed frames do not end the wait. On
    /// `Timeout` reported state is unchanged and the session stays connected.
    pub fn request_status(&mut self) -> SessionResult<StatusSnapshot> {
        self.send_command(Command::QueryStatus)?;

        let attempts = self.config.status_poll_attempts.max(1);
        let interval = self.config.poll_interval();
        for attempt in 1..=attempts {
            if attempt > 1 {
                if let Some(transport) = self.transport.as_mut() {
                    transport.wait_readable(interval);
                }
            }
            if self.receive(|_, _| {})? > 0 {
                metrics::histogram!(metric_defs::STATUS_POLL_ATTEMPTS.name, &self.labels.to_labels())
                    .record(attempt as f64);
                return Ok(self.snapshot());
            }
        }

        debug!(
            "Session[{}]: no status frame after {} attempts",
            self.config.device_name, attempts
        );
        metrics::counter!(metric_defs::STATUS_TIMEOUTS.name, &self.labels.to_labels()).increment(1);
        Err(SessionError::Timeout { attempts })
    }

    /// Read whatever has arrived and apply every complete frame.
    ///
    /// Never blocks. Returns the number of frames applied; malformed frames
    /// are dropped and not counted. Works in both modes.
    pub fn pump_incoming(&mut self) -> SessionResult<usize> {
        self.pump_incoming_with(|_, _| {})
    }

    /// [`Session::pump_incoming`], also handing every applied frame to
    /// `on_frame` in arrival order, after it has been applied.
    ///
    /// Several frames can arrive in one read; the snapshot only shows the last
    /// of them.
    pub fn pump_incoming_with<F>(&mut self, on_frame: F) -> SessionResult<usize>
    where
        F: FnMut(&DecodedFields, Instant),
    {
        if self.transport.is_none() {
            return Err(SessionError::NotConnected);
        }
        self.receive(on_frame)
    }

    fn receive<F>(&mut self, mut on_frame: F) -> SessionResult<usize>
    where
        F: FnMut(&DecodedFields, Instant),
    {
        let read = match self.transport.as_mut() {
            Some(transport) => transport.read_available(),
            None => return Err(SessionError::NotConnected),
        };
        let chunk = read.map_err(|e| self.link_lost(e))?;

        if !chunk.is_empty() {
            metrics::counter!(metric_defs::RX_BYTES.name, &self.labels.to_labels())
                .increment(chunk.len() as u64);
            self.rx_buffer.extend_from_slice(&chunk);
        }

        let now = Instant::now();
        let mut applied = 0;
        loop {
            let (frame, consumed) = self.codec.try_extract_frame(&self.rx_buffer);
            let Some(frame) = frame else { break };
            self.rx_buffer.advance(consumed);

            match self.codec.decode_frame(&frame) {
                Ok(fields) => {
                    trace!("Session[{}]: applying {:?}", self.config.device_name, fields);
                    for event in self.state.apply(&fields, now) {
                        self.record_fault(&event);
                    }
                    on_frame(&fields, now);
                    applied += 1;
                    metrics::counter!(metric_defs::FRAMES_DECODED.name, &self.labels.to_labels())
                        .increment(1);
                }
                Err(e) => {
                    debug!(
                        "Session[{}]: dropped {}-byte frame: {}",
                        self.config.device_name,
                        frame.len(),
                        e
                    );
                    metrics::counter!(metric_defs::FRAMES_MALFORMED.name, &self.labels.to_labels())
                        .increment(1);
                }
            }
        }

        metrics::gauge!(metric_defs::RX_BUFFERED.name, &self.labels.to_labels())
            .set(self.rx_buffer.len() as f64);
        Ok(applied)
    }

    fn record_fault(&self, event: &FaultEvent) {
        warn!(
            "Session[{}]: fault code {} detected",
            self.config.device_name, event.code
        );
        metrics::counter!(
            metric_defs::FAULTS_DETECTED.name,
            &self.labels.with(&[("code", event.code.to_string())])
        )
        .increment(1);
    }

    fn write(&mut self, bytes: &[u8]) -> SessionResult<()> {
        let result = match self.transport.as_mut() {
            Some(transport) => transport.write(bytes),
            None => return Err(SessionError::NotConnected),
        };
        result.map_err(|e| self.link_lost(e))
    }

    /// Tear the session down after a transport failure.
    fn link_lost(&mut self, error: std::io::Error) -> SessionError {
        warn!("Session[{}]: link lost: {}", self.config.device_name, error);
        metrics::counter!(metric_defs::LINK_LOST.name, &self.labels.to_labels()).increment(1);
        self.disconnect();
        SessionError::LinkLost(error)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connection: self.connection_state(),
            mode: self.mode,
            setpoint: self.state.setpoint(),
            temperature: self.state.temperature(),
            fault: self.state.fault(),
            reported_ramp_rate: self.state.reported_ramp_rate(),
            last_ack: self.state.last_ack(),
            commanded: self.commanded,
            pending_faults: self.state.faults().len(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn commanded(&self) -> &CommandedValues {
        &self.commanded
    }

    pub fn last_ack(&self) -> Option<TimestampedValue<CommandKind>> {
        self.state.last_ack()
    }

    pub fn reported_ramp_rate(&self) -> Option<TimestampedValue<f64>> {
        self.state.reported_ramp_rate()
    }

    /// Fault events in detection order, without removing them.
    pub fn faults(&self) -> &FaultQueue {
        self.state.faults()
    }

    /// Remove and return pending fault events, oldest first.
    pub fn drain_faults(&mut self) -> Vec<FaultEvent> {
        self.state.faults_mut().drain()
    }

    pub fn clear_faults(&mut self) {
        self.state.faults_mut().clear();
    }

    /// Bytes held as a partial frame.
    pub fn buffered_len(&self) -> usize {
        self.rx_buffer.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn framing(&self) -> Framing {
        self.codec.framing()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use occtl_protocol::{DecodedFields, FaultCode, Frame, TextCodec};
    use std::io;

    fn status_bytes(fields: &DecodedFields) -> Vec<u8> {
        TextCodec::new().encode_fields(fields)
    }

    fn connected() -> (Session, crate::transport::MemoryHandle) {
        let (transport, handle) = MemoryTransport::pair();
        let session = Session::open(SessionConfig::default(), transport).unwrap();
        (session, handle)
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let mut session = Session::new(SessionConfig::default());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(session.enable(), Err(SessionError::NotConnected)));
        assert!(matches!(session.pump_incoming(), Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_connect_refuses_closed_transport() {
        let (transport, handle) = MemoryTransport::pair();
        handle.refuse_open();
        let mut session = Session::new(SessionConfig::default());
        assert!(matches!(session.connect(transport), Err(SessionError::Connect(_))));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_send_command_writes_encoded_bytes() {
        let (mut session, handle) = connected();
        session.set_temperature(60.0).unwrap();
        assert_eq!(handle.written(), vec![TextCodec::new().encode(&Command::SetTemperature(60.0)).unwrap()]);
        assert_eq!(session.commanded().setpoint, 60.0);
    }

    #[test]
    fn test_commanded_value_matches_wire() {
        let (mut session, handle) = connected();
        session.set_ramp_rate(0.015).unwrap();

        let codec = TextCodec::new();
        let sent = codec.decode_command(&Frame::new(handle.written()[0].clone())).unwrap();
        assert_eq!(sent, Command::SetRampRate(session.commanded().ramp_rate));
    }

    #[test]
    fn test_invalid_argument_writes_nothing() {
        let (mut session, handle) = connected();
        let err = session.set_ramp_rate(250.0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(err.is_recoverable());
        assert!(handle.written().is_empty());
        assert!(session.is_connected());
        assert_eq!(session.commanded().ramp_rate, 100.0);
    }

    #[test]
    fn test_continuous_mode_transitions() {
        let (mut session, handle) = connected();
        assert_eq!(session.mode(), OperatingMode::Polled);

        session.set_continuous_output(true).unwrap();
        assert_eq!(session.mode(), OperatingMode::Continuous);
        assert_eq!(handle.read_count(), 0);

        session.reset_defaults().unwrap();
        assert_eq!(session.mode(), OperatingMode::Polled);
        assert!(!session.commanded().continuous_output);
    }

    #[test]
    fn test_pump_applies_frames() {
        let (mut session, handle) = connected();
        handle.push_incoming(status_bytes(&DecodedFields::new().with_temperature(25.0)));
        assert_eq!(session.pump_incoming().unwrap(), 1);
        assert_eq!(session.snapshot().temperature_c(), Some(25.0));
    }

    #[test]
    fn test_pump_reports_every_frame() {
        let (mut session, handle) = connected();
        let mut burst = Vec::new();
        for t in [25.0, 25.5, 26.0] {
            burst.extend(status_bytes(&DecodedFields::new().with_temperature(t)));
        }
        handle.push_incoming(burst);

        let mut seen = Vec::new();
        let applied = session
            .pump_incoming_with(|fields, _| seen.extend(fields.temperature()))
            .unwrap();
        assert_eq!(applied, 3);
        assert_eq!(seen, vec![25.0, 25.5, 26.0]);
        assert_eq!(session.snapshot().temperature_c(), Some(26.0));
    }

    #[test]
    fn test_request_status_waits_between_attempts() {
        let (mut session, handle) = connected();
        handle.push_incoming(Vec::new());
        handle.push_incoming(Vec::new());
        handle.push_incoming(status_bytes(&DecodedFields::new().with_setpoint(60.0)));

        let snapshot = session.request_status().unwrap();
        assert_eq!(snapshot.setpoint_c(), Some(60.0));
        assert_eq!(handle.read_count(), 3);
        assert_eq!(handle.wait_count(), 2);
    }

    #[test]
    fn test_write_failure_disconnects_once() {
        let (mut session, handle) = connected();
        handle.fail_writes(io::ErrorKind::BrokenPipe);

        let err = session.enable().unwrap_err();
        assert!(matches!(err, SessionError::LinkLost(_)));
        assert!(!err.is_recoverable());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        session.disconnect();
        drop(session);
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_disconnect_keeps_pending_faults() {
        let (mut session, handle) = connected();
        handle.push_incoming(status_bytes(&DecodedFields::new().with_fault(FaultCode(7)).with_temperature(90.0)));
        session.pump_incoming().unwrap();

        session.disconnect();
        assert!(session.snapshot().temperature.is_none());
        assert_eq!(session.drain_faults().len(), 1);
        assert!(session.faults().is_empty());
    }

    #[test]
    fn test_reconnect_starts_fresh() {
        let (mut session, handle) = connected();
        handle.push_incoming(status_bytes(&DecodedFields::new().with_fault(FaultCode(2))));
        session.pump_incoming().unwrap();
        session.set_continuous_output(true).unwrap();

        let (second, _second_handle) = MemoryTransport::pair();
        session.connect(second).unwrap();

        assert_eq!(handle.close_count(), 1);
        assert_eq!(session.mode(), OperatingMode::Polled);
        assert!(session.faults().is_empty());
        assert!(session.snapshot().fault.is_none());
    }
}
