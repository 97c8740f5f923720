//! Decoder behavior over realistic multi-packet streams, including the
//! guarantee that read-boundary placement never changes the result.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use probescope::buffer::RingBuffer;
use probescope::trace::{TraceDecoder, TraceSample};

/// Software source packet: channel write of `size` bytes
fn encode_write(channel: u8, value: u32, size: usize) -> Vec<u8> {
    assert!(matches!(size, 1 | 2 | 4));
    let size_bits = if size == 4 { 3 } else { size as u8 };
    let mut out = vec![(channel << 3) | size_bits];
    out.extend_from_slice(&value.to_le_bytes()[..size]);
    out
}

/// Local timestamp packet in continuation form
fn encode_timestamp(mut ticks: u64) -> Vec<u8> {
    let mut out = vec![0xC0];
    loop {
        let group = (ticks & 0x7f) as u8;
        ticks >>= 7;
        if ticks == 0 {
            out.push(group);
            break;
        }
        out.push(group | 0x80);
    }
    out
}

fn decode_in_chunks(stream: &[u8], chunk_size: usize, resolution: f64) -> Vec<TraceSample> {
    let ring = Arc::new(RingBuffer::new(100_000));
    let mut decoder = TraceDecoder::new(resolution, ring.clone());
    for chunk in stream.chunks(chunk_size.max(1)) {
        decoder.process_data(chunk);
    }
    let mut samples = Vec::new();
    while let Some(s) = ring.pop_timeout(Duration::from_millis(1)) {
        samples.push(s);
    }
    samples
}

#[test]
fn known_stream_decodes_to_one_sample() {
    let samples = decode_in_chunks(&[0x09, 0xBB, 0xC0, 0xCE, 0x09], 64, 1.0 / 160_000_000.0);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].channels[1], 0xBB);
    assert!((samples[0].timestamp - 7.6875e-6).abs() < 1e-12);
}

#[test]
fn multi_sample_stream_accumulates_timestamps() {
    let mut stream = Vec::new();
    for i in 0..8u32 {
        stream.extend(encode_write(0, i * 10, 4));
        stream.extend(encode_write(2, i, 1));
        stream.extend(encode_timestamp(1000));
    }

    let samples = decode_in_chunks(&stream, stream.len(), 1e-6);
    assert_eq!(samples.len(), 8);
    for (i, sample) in samples.iter().enumerate() {
        assert_eq!(sample.channels[0], i as u32 * 10);
        assert_eq!(sample.channels[2], i as u32);
        // Each timestamp packet advances the clock by 1000 ticks
        let expected = (i as f64 + 1.0) * 1000.0 * 1e-6;
        assert!((sample.timestamp - expected).abs() < 1e-12);
    }
}

#[test]
fn split_mid_timestamp_matches_unsplit() {
    let mut stream = Vec::new();
    stream.extend(encode_write(1, 0xCAFE, 2));
    stream.extend(encode_timestamp(1_000_000)); // multi-byte continuation
    stream.extend(encode_write(1, 0xBEEF, 2));
    stream.extend(encode_timestamp(1_000_000));

    let whole = decode_in_chunks(&stream, stream.len(), 1e-6);
    // Chunk size 1 forces every packet to straddle call boundaries
    let split = decode_in_chunks(&stream, 1, 1e-6);
    assert_eq!(whole.len(), 2);
    assert_eq!(whole, split);
}

proptest! {
    /// Where the byte stream is cut can never change what it decodes to.
    #[test]
    fn chunking_is_invisible(
        ops in prop::collection::vec(
            (0u8..4, any::<u32>(), prop::sample::select(vec![1usize, 2, 4]), 1u64..1_000_000),
            1..20,
        ),
        chunk_size in 1usize..64,
    ) {
        let mut stream = Vec::new();
        for &(channel, value, size, ticks) in &ops {
            stream.extend(encode_write(channel, value, size));
            stream.extend(encode_timestamp(ticks));
        }

        let whole = decode_in_chunks(&stream, stream.len(), 1e-6);
        let chunked = decode_in_chunks(&stream, chunk_size, 1e-6);

        prop_assert_eq!(whole.len(), ops.len());
        prop_assert_eq!(whole, chunked);
    }
}
