//! ITM packet decoder
//!
//! Byte-at-a-time state machine over the SWO stream. Packet boundaries do
//! not line up with read boundaries, so all partial state (payload
//! accumulator, timestamp continuation bytes) lives in the decoder and
//! survives across `process_data` calls.
//!
//! Software source packets update a per-channel value register; a local
//! timestamp packet closes the group and emits one [`TraceSample`] carrying
//! the current value of every channel (channels hold their last written
//! value between updates).

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::RingBuffer;

use super::{TraceIndicators, TraceSample, TRACE_CHANNELS};

/// How long a finished sample may wait for queue space before it is
/// dropped and counted as an overrun
const PUSH_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Debug)]
enum DecoderState {
    Idle,
    /// Accumulating a software source packet payload
    SourcePayload {
        channel: u8,
        remaining: usize,
        acc: u32,
        shift: u32,
    },
    /// Collecting local timestamp continuation bytes
    Timestamp { tc: u8, bytes: Vec<u8> },
    /// Skipping a fixed-size payload we do not interpret
    SkipSized { remaining: usize },
    /// Skipping continuation bytes until the top bit clears
    SkipContinuation,
}

pub struct TraceDecoder {
    state: DecoderState,
    /// Last written value of each stimulus channel
    current: [u32; TRACE_CHANNELS],
    /// Accumulated local timestamp ticks since `reset`
    total_ticks: u64,
    /// Seconds per timestamp tick (1 / core clock)
    resolution: f64,
    output: Arc<RingBuffer<TraceSample>>,
    indicators: TraceIndicators,
}

impl TraceDecoder {
    pub fn new(resolution: f64, output: Arc<RingBuffer<TraceSample>>) -> Self {
        Self {
            state: DecoderState::Idle,
            current: [0; TRACE_CHANNELS],
            total_ticks: 0,
            resolution,
            output,
            indicators: TraceIndicators::default(),
        }
    }

    /// Counters accumulated since the last `reset`
    pub fn indicators(&self) -> TraceIndicators {
        self.indicators
    }

    /// Drop all partial state and counters for a new session
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.current = [0; TRACE_CHANNELS];
        self.total_ticks = 0;
        self.indicators = TraceIndicators::default();
    }

    /// Feed a chunk of raw SWO bytes.
    ///
    /// A packet split across two calls decodes identically to the same
    /// bytes arriving in one call.
    pub fn process_data(&mut self, data: &[u8]) {
        for &byte in data {
            self.step(byte);
        }
    }

    fn step(&mut self, byte: u8) {
        let state = std::mem::replace(&mut self.state, DecoderState::Idle);
        match state {
            DecoderState::Idle => self.step_idle(byte),
            DecoderState::SourcePayload {
                channel,
                remaining,
                acc,
                shift,
            } => {
                let acc = acc | u32::from(byte) << shift;
                if remaining > 1 {
                    self.state = DecoderState::SourcePayload {
                        channel,
                        remaining: remaining - 1,
                        acc,
                        shift: shift + 8,
                    };
                } else {
                    self.indicators.frames_total += 1;
                    if usize::from(channel) < TRACE_CHANNELS {
                        self.current[usize::from(channel)] = acc;
                    } else {
                        self.indicators.error_frames_total += 1;
                    }
                }
            }
            DecoderState::Timestamp { tc, mut bytes } => {
                bytes.push(byte);
                if byte & 0x80 != 0 {
                    self.state = DecoderState::Timestamp { tc, bytes };
                } else {
                    let mut ticks = 0u64;
                    for (i, b) in bytes.iter().enumerate() {
                        ticks |= u64::from(b & 0x7f) << (7 * i);
                    }
                    self.finish_timestamp(ticks, tc);
                }
            }
            DecoderState::SkipSized { remaining } => {
                if remaining > 1 {
                    self.state = DecoderState::SkipSized {
                        remaining: remaining - 1,
                    };
                } else {
                    self.indicators.error_frames_total += 1;
                }
            }
            DecoderState::SkipContinuation => {
                if byte & 0x80 != 0 {
                    self.state = DecoderState::SkipContinuation;
                } else {
                    self.indicators.frames_total += 1;
                }
            }
        }
    }

    fn step_idle(&mut self, byte: u8) {
        if byte == 0x00 {
            // Synchronization filler
            return;
        }
        if byte == 0x70 {
            // ITM overflow: the target dropped data
            self.indicators.error_frames_total += 1;
            return;
        }
        if byte & 0x0b == 0x08 {
            // Extension packet, contents ignored
            if byte & 0x80 != 0 {
                self.state = DecoderState::SkipContinuation;
            } else {
                self.indicators.frames_total += 1;
            }
            return;
        }
        if byte & 0x0f == 0x00 {
            // Local timestamp
            if byte & 0x80 == 0 {
                // Single-byte form, ticks in bits 6:4
                self.finish_timestamp(u64::from((byte & 0x7f) >> 4), 0);
            } else {
                self.state = DecoderState::Timestamp {
                    tc: (byte >> 4) & 0x3,
                    bytes: Vec::with_capacity(4),
                };
            }
            return;
        }
        let size = match byte & 0x3 {
            0 => {
                // Unrecognized header (the global timestamp family lands
                // here). Its continuation payload must still be consumed
                // or the following packets are misparsed as headers.
                self.indicators.error_frames_total += 1;
                if byte & 0x80 != 0 {
                    self.state = DecoderState::SkipContinuation;
                }
                return;
            }
            3 => 4,
            n => usize::from(n),
        };
        if byte & 0x04 == 0 {
            // Software source: channel in the upper five bits
            self.state = DecoderState::SourcePayload {
                channel: byte >> 3,
                remaining: size,
                acc: 0,
                shift: 0,
            };
        } else {
            // Hardware source (DWT): not interpreted here, skip the payload
            self.state = DecoderState::SkipSized { remaining: size };
        }
    }

    /// Close the current sample group at an accumulated timestamp
    fn finish_timestamp(&mut self, delta_ticks: u64, tc: u8) {
        self.indicators.frames_total += 1;
        if (1..=3).contains(&tc) {
            self.indicators.delayed_timestamp[usize::from(tc) - 1] += 1;
        }
        self.total_ticks += delta_ticks;
        let sample = TraceSample {
            timestamp: self.total_ticks as f64 * self.resolution,
            channels: self.current,
        };
        if !self.output.push_timeout(sample, PUSH_TIMEOUT) {
            self.indicators.overruns += 1;
            tracing::warn!("trace sample queue full, sample dropped");
        }
    }
}
