//! Debug and trace probe interfaces
//!
//! Two traits split the hardware surface: [`DebugProbe`] covers memory
//! sampling over SWD, [`TraceProbe`] covers the SWO byte stream. Both are
//! implemented for real probes (via probe-rs) and for mocks used in tests
//! and the demo binary.

pub mod hardware;
pub mod mock;
pub mod swo;

pub use hardware::{list_probes, HardwareProbe, ProbeFamily};
pub use mock::{MockProbe, MockTraceProbe};
pub use swo::SwoTraceProbe;

use std::collections::HashMap;

use crate::error::{ProbeScopeError, Result};

/// Probe selection and wire parameters shared by both probe kinds
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Serial number to select among attached probes; `None` takes the first
    pub serial_number: Option<String>,
    /// Target chip name, e.g. "STM32F407VGTx"
    pub target_name: String,
    /// SWD clock in kHz
    pub speed_khz: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            serial_number: None,
            target_name: String::new(),
            speed_khz: 4000,
        }
    }
}

/// SWO configuration on top of the probe selection
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub probe: ProbeSettings,
    /// Target core clock; timestamps are counted in core cycles
    pub core_frequency_hz: u32,
    /// SWO baud rate the probe should sample at
    pub swo_frequency_hz: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            probe: ProbeSettings::default(),
            core_frequency_hz: 160_000_000,
            swo_frequency_hz: 2_000_000,
        }
    }
}

/// One entry from a probe-side sampling stream: values of the watched
/// addresses captured together at a probe-generated timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Seconds since acquisition start
    pub timestamp: f64,
    /// Raw 32-bit value per watched address
    pub values: HashMap<u64, u32>,
}

/// Read timing and throughput counters for a sampling session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub successful_reads: u64,
    pub failed_reads: u64,
    pub total_read_time_us: u64,
    pub last_read_time_us: u64,
    pub total_bytes_read: u64,
}

impl ProbeStats {
    pub fn record_success(&mut self, time_us: u64, bytes: u64) {
        self.successful_reads += 1;
        self.total_read_time_us += time_us;
        self.last_read_time_us = time_us;
        self.total_bytes_read += bytes;
    }

    pub fn record_failure(&mut self) {
        self.failed_reads += 1;
    }

    pub fn avg_read_time_us(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.successful_reads as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.successful_reads + self.failed_reads;
        if total == 0 {
            100.0
        } else {
            (self.successful_reads as f64 / total as f64) * 100.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Memory sampling interface over SWD.
///
/// Implementations must be `Send`; the acquisition controller owns the
/// probe behind a mutex and calls it from its worker thread.
pub trait DebugProbe: Send {
    /// Open the probe and attach to the target.
    ///
    /// `watch` lists the (address, size in bytes) fields the session will
    /// read; probes with a streaming engine use it to program the watch
    /// set, plain probes may ignore it.
    fn start_acquisition(
        &mut self,
        settings: &ProbeSettings,
        watch: &[(u64, usize)],
        sample_frequency_hz: u32,
    ) -> Result<()>;

    /// Detach from the target and release the probe
    fn stop_acquisition(&mut self);

    /// Whether the probe is attached and usable
    fn is_valid(&self) -> bool;

    /// Read `buf.len()` bytes from target memory
    fn read_memory(&mut self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Write bytes to target memory
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()>;

    /// Pull one entry from the probe-side sampling stream.
    ///
    /// Returns `Ok(None)` when no entry is ready yet. Only meaningful when
    /// [`DebugProbe::supports_streaming`] is true.
    fn read_single_entry(&mut self) -> Result<Option<StreamEntry>> {
        Err(ProbeScopeError::Trace(
            "probe has no sampling stream".into(),
        ))
    }

    /// Whether the probe samples autonomously via `read_single_entry`
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Whether reads must land on 4-byte-aligned word boundaries
    fn requires_aligned_access(&self) -> bool {
        false
    }

    /// Serial numbers of matching probes currently attached
    fn connected_devices(&self) -> Vec<String>;

    /// Human-readable description of the most recent failure
    fn last_error_msg(&self) -> String;
}

/// SWO trace interface
pub trait TraceProbe: Send {
    /// Open the probe, attach, and enable SWO for the channels set in
    /// `channel_mask` (bit N enables ITM stimulus channel N)
    fn start_trace(&mut self, config: &TraceConfig, channel_mask: u32) -> Result<()>;

    /// Disable SWO and release the probe
    fn stop_trace(&mut self);

    /// Whether tracing is active
    fn is_valid(&self) -> bool;

    /// Read available raw SWO bytes into `buf`, returning the count.
    /// Zero means nothing was buffered.
    fn read_trace(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seconds per timestamp tick for the active configuration
    fn timestamp_resolution(&self) -> f64;

    /// Serial numbers of matching probes currently attached
    fn connected_devices(&self) -> Vec<String>;

    /// Human-readable description of the most recent failure
    fn last_error_msg(&self) -> String;
}

/// Read a field of up to 4 bytes, honoring the probe's alignment rule.
///
/// Probes that require aligned access get a read of the containing
/// word-aligned span; the field bytes are then extracted from it. A field
/// that straddles a word boundary reads two words.
pub fn read_field(probe: &mut dyn DebugProbe, address: u64, size: usize) -> Result<u32> {
    debug_assert!((1..=4).contains(&size));
    let mut bytes = [0u8; 8];

    if probe.requires_aligned_access() {
        let start = address & !3;
        let end = (address + size as u64 + 3) & !3;
        let span = (end - start) as usize;
        probe.read_memory(start, &mut bytes[..span])?;
        let offset = (address - start) as usize;
        bytes.copy_within(offset..offset + size, 0);
    } else {
        probe.read_memory(address, &mut bytes[..size])?;
    }

    let mut value = 0u32;
    for (i, b) in bytes[..size].iter().enumerate() {
        value |= u32::from(*b) << (8 * i);
    }
    Ok(value)
}
