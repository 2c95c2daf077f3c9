//! Session engine properties over an in-memory transport.

use std::io;
use std::time::Instant;

use occtl_protocol::{
    codec_for, Command, CommandKind, DecodedFields, FaultCode, Framing,
    MAX_BINARY_PAYLOAD, MAX_TEXT_FRAME_LEN,
};
use occtl_session::{
    ConnectionState, MemoryHandle, MemoryTransport, OperatingMode, Session, SessionConfig,
    SessionError,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const FRAMINGS: [Framing; 2] = [Framing::Delimited, Framing::LengthPrefixed];

fn connect(framing: Framing) -> (Session, MemoryHandle) {
    let (transport, handle) = MemoryTransport::pair();
    let config = SessionConfig::default()
        .with_device_name("test-oven")
        .with_framing(framing);
    let session = Session::open(config, transport).unwrap();
    (session, handle)
}

fn frame(framing: Framing, fields: &DecodedFields) -> Vec<u8> {
    codec_for(framing).encode_fields(fields)
}

fn max_partial(framing: Framing) -> usize {
    match framing {
        Framing::Delimited => MAX_TEXT_FRAME_LEN,
        Framing::LengthPrefixed => MAX_BINARY_PAYLOAD + 4,
    }
}

/// A seeded stream of valid, corrupted, and noise-prefixed frames.
fn mixed_stream(framing: Framing, rng: &mut ChaCha8Rng, count: usize) -> Vec<u8> {
    let mut stream = Vec::new();
    for i in 0..count {
        let fields = DecodedFields::new()
            .with_setpoint(rng.gen_range(0..=300_000) as f64 / 1000.0)
            .with_temperature(rng.gen_range(0..=300_000) as f64 / 1000.0)
            .with_fault(FaultCode([0, 0, 3, 5][rng.gen_range(0..4)]));
        let mut bytes = frame(framing, &fields);
        match i % 7 {
            2 => {
                // Damage the checksum only, keeping the frame boundary intact.
                let at = match framing {
                    Framing::Delimited => bytes.len() - 3,
                    Framing::LengthPrefixed => bytes.len() - 1,
                };
                bytes[at] ^= 0x5A;
            }
            4 => stream.extend_from_slice(b"\x00\xffjunk"),
            _ => {}
        }
        stream.extend_from_slice(&bytes);
    }
    stream
}

/// Observable result of feeding a stream: applied frame count and final state.
fn observe(session: &Session) -> (Option<f64>, Option<f64>, FaultCode, Vec<u8>) {
    let snapshot = session.snapshot();
    let faults = session.faults().iter().map(|e| e.code.0).collect();
    (snapshot.setpoint_c(), snapshot.temperature_c(), snapshot.fault_code(), faults)
}

#[test]
fn test_set_temperature_leaves_reported_state_alone() {
    for framing in FRAMINGS {
        let (mut session, handle) = connect(framing);
        for v in [0.0, 0.01, 40.0, 60.0, 123.456, 299.99, 300.0] {
            session.send_command(Command::SetTemperature(v)).unwrap();

            let snapshot = session.snapshot();
            assert!(snapshot.setpoint.is_none());
            assert!(snapshot.temperature.is_none());
            assert_eq!(snapshot.commanded.setpoint, v);
        }
        assert_eq!(handle.written().len(), 7);
    }
}

#[test]
fn test_chunk_boundary_independence() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);

    for framing in FRAMINGS {
        for _trial in 0..20 {
            let stream = mixed_stream(framing, &mut rng, 30);

            let (mut whole, whole_handle) = connect(framing);
            whole_handle.push_incoming(stream.clone());
            let whole_applied = whole.pump_incoming().unwrap();

            let mut cuts: Vec<usize> = (0..rng.gen_range(1..40))
                .map(|_| rng.gen_range(0..=stream.len()))
                .collect();
            cuts.sort_unstable();

            let (mut chunked, chunked_handle) = connect(framing);
            chunked_handle.push_chunked(&stream, &cuts);
            let mut chunked_applied = 0;
            while chunked_handle.pending_incoming() > 0 {
                chunked_applied += chunked.pump_incoming().unwrap();
                assert!(chunked.buffered_len() < max_partial(framing));
            }

            assert_eq!(chunked_applied, whole_applied);
            assert_eq!(observe(&chunked), observe(&whole));
            assert_eq!(chunked.buffered_len(), whole.buffered_len());
        }
    }
}

#[test]
fn test_bytewise_delivery_matches_whole() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for framing in FRAMINGS {
        let stream = mixed_stream(framing, &mut rng, 10);

        let (mut whole, whole_handle) = connect(framing);
        whole_handle.push_incoming(stream.clone());
        let whole_applied = whole.pump_incoming().unwrap();

        let (mut bytewise, handle) = connect(framing);
        let mut applied = 0;
        for &b in &stream {
            handle.push_incoming(vec![b]);
            applied += bytewise.pump_incoming().unwrap();
        }

        assert_eq!(applied, whole_applied);
        assert_eq!(observe(&bytewise), observe(&whole));
    }
}

#[test]
fn test_garbage_never_corrupts_receive_buffer() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xBAD);
    for framing in FRAMINGS {
        let (mut session, handle) = connect(framing);
        for _ in 0..200 {
            let len = rng.gen_range(0..64);
            let garbage: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            handle.push_incoming(garbage);
            session.pump_incoming().unwrap();
            assert!(session.buffered_len() < max_partial(framing));
        }

        // A clean break, then a valid frame still decodes.
        handle.push_incoming(vec![0u8; max_partial(framing) + 8]);
        session.pump_incoming().unwrap();
        handle.push_incoming(frame(framing, &DecodedFields::new().with_temperature(42.5)));
        session.pump_incoming().unwrap();
        assert_eq!(session.snapshot().temperature_c(), Some(42.5));
    }
}

#[test]
fn test_one_fault_entry_per_transition() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xFA);
    for framing in FRAMINGS {
        let (mut session, handle) = connect(framing);
        let mut expected = Vec::new();
        let mut current = 0u8;
        for _ in 0..100 {
            let code = [0u8, 0, 3, 3, 5][rng.gen_range(0..5)];
            if code != 0 && code != current {
                expected.push(code);
            }
            current = code;
            handle.push_incoming(frame(framing, &DecodedFields::new().with_fault(FaultCode(code))));
        }
        while handle.pending_incoming() > 0 {
            session.pump_incoming().unwrap();
        }

        let recorded: Vec<u8> = session.faults().iter().map(|e| e.code.0).collect();
        assert_eq!(recorded, expected);
        let times: Vec<Instant> = session.faults().iter().map(|e| e.detected_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn test_request_status_timeout_leaves_state_unchanged() {
    let (transport, handle) = MemoryTransport::pair();
    let config = SessionConfig::default().with_status_poll_attempts(5);
    let mut session = Session::open(config, transport).unwrap();
    handle.push_incoming(frame(Framing::Delimited, &DecodedFields::new().with_temperature(30.0)));
    session.pump_incoming().unwrap();
    let before = session.snapshot();

    let err = session.request_status().unwrap_err();
    assert!(matches!(err, SessionError::Timeout { attempts: 5 }));
    assert!(err.is_recoverable());
    assert_eq!(session.snapshot(), before);
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(handle.wait_count(), 4);
}

#[test]
fn test_request_status_skips_malformed_frames() {
    for framing in FRAMINGS {
        let (mut session, handle) = connect(framing);
        let mut bad = frame(framing, &DecodedFields::new().with_temperature(99.0));
        let last = bad.len() - 3;
        bad[last] ^= 0x01;
        handle.push_incoming(bad);
        handle.push_incoming(frame(framing, &DecodedFields::new().with_temperature(21.0)));

        let snapshot = session.request_status().unwrap();
        assert_eq!(snapshot.temperature_c(), Some(21.0));
        assert_eq!(handle.read_count(), 2);

        let query = codec_for(framing).encode(&Command::QueryStatus).unwrap();
        assert_eq!(handle.written(), vec![query]);
    }
}

#[test]
fn test_reply_fields_round_trip() {
    let fields = DecodedFields::new()
        .with_setpoint(60.0)
        .with_temperature(58.7)
        .with_fault(FaultCode(3))
        .with_ramp_rate(0.1)
        .with_ack(CommandKind::SetTemperature);
    for framing in FRAMINGS {
        let codec = codec_for(framing);
        let bytes = codec.encode_fields(&fields);
        let (frame, consumed) = codec.try_extract_frame(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(codec.decode_frame(&frame.unwrap()).unwrap(), fields);
    }
}

#[test]
fn test_setpoint_and_temperature_scenario() {
    for framing in FRAMINGS {
        let (transport, handle) = MemoryTransport::pair();
        let connected_at = Instant::now();
        let config = SessionConfig::default().with_framing(framing);
        let mut session = Session::open(config, transport).unwrap();

        session.send_command(Command::SetTemperature(60.0)).unwrap();
        handle.push_incoming(frame(
            framing,
            &DecodedFields::new().with_setpoint(60.0).with_temperature(58.7),
        ));
        assert_eq!(session.pump_incoming().unwrap(), 1);

        let snapshot = session.snapshot();
        let setpoint = snapshot.setpoint.unwrap();
        let temperature = snapshot.temperature.unwrap();
        assert_eq!(setpoint.value, 60.0);
        assert_eq!(temperature.value, 58.7);
        assert!(setpoint.observed_at >= connected_at);
        assert!(temperature.observed_at >= connected_at);
    }
}

#[test]
fn test_fault_scenario() {
    for framing in FRAMINGS {
        let (mut session, handle) = connect(framing);
        for code in [0, 3, 3] {
            handle.push_incoming(frame(framing, &DecodedFields::new().with_fault(FaultCode(code))));
            session.pump_incoming().unwrap();
        }
        assert_eq!(session.faults().len(), 1);
        assert_eq!(session.faults().latest().unwrap().code, FaultCode(3));

        handle.push_incoming(frame(framing, &DecodedFields::new().with_fault(FaultCode(0))));
        session.pump_incoming().unwrap();
        assert_eq!(session.faults().len(), 1);
        assert_eq!(session.snapshot().fault_code(), FaultCode::NONE);

        let drained = session.drain_faults();
        assert_eq!(drained.len(), 1);
        assert!(session.faults().is_empty());
    }
}

#[test]
fn test_continuous_mode_pump() {
    let (mut session, handle) = connect(Framing::Delimited);
    session.set_continuous_output(true).unwrap();
    assert_eq!(session.mode(), OperatingMode::Continuous);

    let mut stream = Vec::new();
    for t in [25.0, 25.5, 26.0] {
        stream.extend(frame(Framing::Delimited, &DecodedFields::new().with_temperature(t)));
    }
    handle.push_incoming(stream);
    assert_eq!(session.pump_incoming().unwrap(), 3);
    assert_eq!(session.snapshot().temperature_c(), Some(26.0));
    assert_eq!(session.pump_incoming().unwrap(), 0);
}

#[test]
fn test_read_failure_is_link_lost() {
    let (mut session, handle) = connect(Framing::Delimited);
    handle.fail_reads(io::ErrorKind::ConnectionReset);

    let err = session.pump_incoming().unwrap_err();
    match err {
        SessionError::LinkLost(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected LinkLost, got {:?}", other),
    }
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(session.request_status(), Err(SessionError::NotConnected)));

    session.disconnect();
    session.disconnect();
    assert_eq!(handle.close_count(), 1);
}

#[test]
fn test_reset_defaults_keeps_history() {
    let (mut session, handle) = connect(Framing::Delimited);
    session.set_temperature(150.0).unwrap();
    session.set_continuous_output(true).unwrap();
    handle.push_incoming(frame(
        Framing::Delimited,
        &DecodedFields::new().with_temperature(120.0).with_fault(FaultCode(4)),
    ));
    session.pump_incoming().unwrap();

    session.reset_defaults().unwrap();
    assert_eq!(session.mode(), OperatingMode::Polled);
    assert_eq!(session.commanded().setpoint, 40.0);
    assert_eq!(session.snapshot().temperature_c(), Some(120.0));
    assert_eq!(session.faults().len(), 1);
}
