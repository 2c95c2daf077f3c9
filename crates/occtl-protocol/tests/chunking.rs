//! Chunk-boundary tests for the bundled codecs.
//!
//! A receive loop feeds whatever bytes arrived into a buffer and extracts
//! frames until the codec asks for more. The decoded frame sequence must not
//! depend on how the stream was chopped into reads.

use occtl_protocol::{
    codec_for, CommandKind, DecodedFields, FaultCode, FrameCodec, Framing,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Build a stream of valid frames with some noise and one corrupted frame.
fn build_stream(codec: &dyn FrameCodec, rng: &mut ChaCha8Rng) -> (Vec<u8>, usize) {
    let mut stream = Vec::new();
    let mut valid = 0;
    for i in 0..40 {
        let fields = DecodedFields::new()
            .with_setpoint(40.0 + i as f64)
            .with_temperature(20.0 + rng.gen_range(0..10_000) as f64 / 1000.0)
            .with_fault(FaultCode(rng.gen_range(0..4)));
        let mut frame = codec.encode_fields(&fields);

        match i % 13 {
            5 => {
                // Flip a bit near the end so the checksum no longer matches.
                let at = frame.len() - 3;
                frame[at] ^= 0x01;
            }
            9 => {
                stream.extend_from_slice(b"\x00\x13noise");
                valid += 1;
            }
            _ => valid += 1,
        }
        stream.extend_from_slice(&frame);
    }
    stream.extend_from_slice(&codec.encode_fields(&DecodedFields::new().with_ack(CommandKind::Enable)));
    valid += 1;
    (stream, valid)
}

/// Run the receive loop over `chunks`, returning every decoded record.
fn receive(codec: &dyn FrameCodec, chunks: &[&[u8]]) -> (Vec<DecodedFields>, Vec<u8>) {
    let mut buffer = Vec::new();
    let mut decoded = Vec::new();
    for chunk in chunks {
        buffer.extend_from_slice(chunk);
        loop {
            match codec.try_extract_frame(&buffer) {
                (Some(frame), consumed) => {
                    buffer.drain(..consumed);
                    if let Ok(fields) = codec.decode_frame(&frame) {
                        decoded.push(fields);
                    }
                }
                (None, consumed) => {
                    assert_eq!(consumed, 0);
                    break;
                }
            }
        }
        // At most one partial prefix is left behind.
        assert_eq!(codec.try_extract_frame(&buffer), (None, 0));
    }
    (decoded, buffer)
}

fn random_chunks<'a>(data: &'a [u8], rng: &mut ChaCha8Rng) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(17));
        let (head, tail) = rest.split_at(n);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

fn check_chunk_independence(framing: Framing) {
    let codec = codec_for(framing);
    let mut rng = ChaCha8Rng::seed_from_u64(0x0C0C);
    let (stream, valid) = build_stream(codec.as_ref(), &mut rng);

    let (whole, residual) = receive(codec.as_ref(), &[&stream]);
    assert_eq!(whole.len(), valid);
    assert!(residual.is_empty());

    for _ in 0..50 {
        let chunks = random_chunks(&stream, &mut rng);
        let (split, residual) = receive(codec.as_ref(), &chunks);
        assert_eq!(split, whole);
        assert!(residual.is_empty());
    }

    let bytewise: Vec<&[u8]> = stream.chunks(1).collect();
    let (split, _) = receive(codec.as_ref(), &bytewise);
    assert_eq!(split, whole);
}

#[test]
fn test_text_codec_chunk_independence() {
    check_chunk_independence(Framing::Delimited);
}

#[test]
fn test_binary_codec_chunk_independence() {
    check_chunk_independence(Framing::LengthPrefixed);
}

#[test]
fn test_trailing_partial_frame_is_kept() {
    for framing in [Framing::Delimited, Framing::LengthPrefixed] {
        let codec = codec_for(framing);
        let full = codec.encode_fields(&DecodedFields::new().with_temperature(21.0));
        let partial = &full[..full.len() - 1];

        let mut data = full.clone();
        data.extend_from_slice(partial);
        let (decoded, residual) = receive(codec.as_ref(), &[&data]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(residual, partial);
    }
}
