//! SWO/ITM trace acquisition
//!
//! The reader thread pulls raw SWO bytes from the probe and feeds them to
//! the [`TraceDecoder`], which reassembles ITM packets into timestamped
//! samples. Decoded samples flow through a [`crate::buffer::RingBuffer`]
//! to the trace controller.

pub mod decoder;
pub mod reader;

pub use decoder::TraceDecoder;
pub use reader::TraceReader;

/// Number of ITM stimulus channels tracked per sample
pub const TRACE_CHANNELS: usize = 10;

/// One decoded trace sample: the channel values in effect at a timestamp.
///
/// Channels hold their last written value between updates, so every sample
/// carries a complete vector even when only one channel changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSample {
    /// Seconds since acquisition start, from accumulated local timestamps
    pub timestamp: f64,
    pub channels: [u32; TRACE_CHANNELS],
}

impl TraceSample {
    pub fn zeroed() -> Self {
        Self {
            timestamp: 0.0,
            channels: [0; TRACE_CHANNELS],
        }
    }
}

/// Stream health counters, published by the reader and decoder.
///
/// The trace controller watches these to detect a misconfigured or
/// overloaded target and stop the session with a diagnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceIndicators {
    /// Completed ITM packets of any kind
    pub frames_total: u64,
    /// Unrecognized headers, overflow markers and out-of-range channels
    pub error_frames_total: u64,
    /// Timestamp packets flagged delayed, indexed by TC code (1..=3)
    pub delayed_timestamp: [u64; 3],
    /// Reader iterations that found no data
    pub sleep_cycles: u64,
    /// Samples dropped because the handoff queue stayed full
    pub overruns: u64,
}
