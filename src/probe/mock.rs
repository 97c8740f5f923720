//! Mock probes for tests and probe-less demos
//!
//! [`MockProbe`] serves reads from a synthetic memory map: static byte
//! regions plus time-varying signal words, so a sampling session produces
//! plausible waveforms without hardware. [`MockTraceProbe`] replays a
//! scripted SWO byte stream.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::f64::consts::TAU;
use std::time::Instant;

use crate::error::{ProbeScopeError, Result};

use super::{DebugProbe, ProbeSettings, StreamEntry, TraceConfig, TraceProbe};

/// Time-varying value generator mapped at a 4-byte word
#[derive(Debug, Clone, Copy)]
pub enum MockSignal {
    /// IEEE-754 f32 bit pattern of `offset + amplitude * sin(2π f t)`
    Sine {
        amplitude: f64,
        frequency_hz: f64,
        offset: f64,
    },
    /// Monotonic counter incrementing `rate_hz` times per second
    Counter { rate_hz: f64 },
    /// Fixed raw word
    Constant(u32),
}

impl MockSignal {
    fn value(&self, t: f64) -> u32 {
        match *self {
            MockSignal::Sine {
                amplitude,
                frequency_hz,
                offset,
            } => ((offset + amplitude * (TAU * frequency_hz * t).sin()) as f32).to_bits(),
            MockSignal::Counter { rate_hz } => (t * rate_hz) as u32,
            MockSignal::Constant(v) => v,
        }
    }
}

/// In-memory stand-in for an SWD probe
pub struct MockProbe {
    regions: BTreeMap<u64, Vec<u8>>,
    signals: HashMap<u64, MockSignal>,
    started: Option<Instant>,
    aligned_only: bool,
    streaming: bool,
    sample_frequency_hz: u32,
    watch: Vec<(u64, usize)>,
    entries_produced: u64,
    last_error: String,
}

impl MockProbe {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            signals: HashMap::new(),
            started: None,
            aligned_only: false,
            streaming: false,
            sample_frequency_hz: 0,
            watch: Vec::new(),
            entries_produced: 0,
            last_error: String::new(),
        }
    }

    /// Reject reads that are not word
    /// aligned, like ST-Link firmware does
    pub fn with_aligned_access(mut self) -> Self {
        self.aligned_only = true;
        self
    }

    /// Enable the probe-side sampling stream
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Map a static byte region
    pub fn with_region(mut self, base: u64, data: Vec<u8>) -> Self {
        self.regions.insert(base, data);
        self
    }

    /// Map a signal word at `address`
    pub fn with_signal(mut self, address: u64, signal: MockSignal) -> Self {
        self.signals.insert(address, signal);
        self
    }

    fn elapsed(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn byte_at(&self, address: u64, t: f64) -> Option<u8> {
        for (&base, signal) in &self.signals {
            if address >= base && address < base + 4 {
                let word = signal.value(t).to_le_bytes();
                return Some(word[(address - base) as usize]);
            }
        }
        for (&base, data) in &self.regions {
            if address >= base && address < base + data.len() as u64 {
                return Some(data[(address - base) as usize]);
            }
        }
        None
    }

    fn raw_field(&self, address: u64, size: usize, t: f64) -> Result<u32> {
        let mut value = 0u32;
        for i in 0..size {
            let byte = self.byte_at(address + i as u64, t).ok_or_else(|| {
                ProbeScopeError::MemoryAccess {
                    address: address + i as u64,
                    message: "unmapped address".into(),
                }
            })?;
            value |= u32::from(byte) << (8 * i);
        }
        Ok(value)
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugProbe for MockProbe {
    fn start_acquisition(
        &mut self,
        _settings: &ProbeSettings,
        watch: &[(u64, usize)],
        sample_frequency_hz: u32,
    ) -> Result<()> {
        self.watch = watch.to_vec();
        self.sample_frequency_hz = sample_frequency_hz;
        self.entries_produced = 0;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop_acquisition(&mut self) {
        self.started = None;
    }

    fn is_valid(&self) -> bool {
        self.started.is_some()
    }

    fn read_memory(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        if self.started.is_none() {
            self.last_error = "acquisition not started".into();
            return Err(ProbeScopeError::Config(self.last_error.clone()));
        }
        if self.aligned_only && (address % 4 != 0 || buf.len() % 4 != 0) {
            self.last_error = format!("unaligned read at {address:#x}");
            return Err(ProbeScopeError::MemoryAccess {
                address,
                message: "unaligned access rejected".into(),
            });
        }
        let t = self.elapsed();
        for (i, slot) in buf.iter_mut().enumerate() {
            match self.byte_at(address + i as u64, t) {
                Some(b) => *slot = b,
                None => {
                    self.last_error = format!("unmapped address {:#x}", address + i as u64);
                    return Err(ProbeScopeError::MemoryAccess {
                        address: address + i as u64,
                        message: "unmapped address".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()> {
        for (&base, region) in self.regions.iter_mut() {
            let end = base + region.len() as u64;
            if address >= base && address + data.len() as u64 <= end {
                let start = (address - base) as usize;
                region[start..start + data.len()].copy_from_slice(data);
                return Ok(());
            }
        }
        self.last_error = format!("write to unmapped address {address:#x}");
        Err(ProbeScopeError::MemoryAccess {
            address,
            message: "unmapped address".into(),
        })
    }

    fn read_single_entry(&mut self) -> Result<Option<StreamEntry>> {
        if !self.streaming {
            return Err(ProbeScopeError::Trace("probe has no sampling stream".into()));
        }
        if self.started.is_none() || self.sample_frequency_hz == 0 {
            return Ok(None);
        }
        let period = 1.0 / f64::from(self.sample_frequency_hz);
        let due = (self.entries_produced + 1) as f64 * period;
        let t = self.elapsed();
        if t < due {
            return Ok(None);
        }

        let mut values = HashMap::with_capacity(self.watch.len());
        for &(address, size) in &self.watch {
            values.insert(address, self.raw_field(address, size, due)?);
        }
        self.entries_produced += 1;
        Ok(Some(StreamEntry {
            timestamp: due,
            values,
        }))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    fn requires_aligned_access(&self) -> bool {
        self.aligned_only
    }

    fn connected_devices(&self) -> Vec<String> {
        vec!["MOCK-0001".into()]
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}

/// Replays scripted SWO byte chunks
pub struct MockTraceProbe {
    script: VecDeque<Vec<u8>>,
    resolution: f64,
    active: bool,
    last_error: String,
}

impl MockTraceProbe {
    /// `resolution` is seconds per timestamp tick, matching what a real
    /// probe derives from the core clock
    pub fn new(resolution: f64) -> Self {
        Self {
            script: VecDeque::new(),
            resolution,
            active: false,
            last_error: String::new(),
        }
    }

    /// Queue a chunk of raw SWO bytes; each chunk is one `read_trace` return
    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        self.script.push_back(chunk);
    }

    pub fn with_script<I: IntoIterator<Item = Vec<u8>>>(mut self, chunks: I) -> Self {
        self.script.extend(chunks);
        self
    }
}

impl TraceProbe for MockTraceProbe {
    fn start_trace(&mut self, _config: &TraceConfig, _channel_mask: u32) -> Result<()> {
        self.active = true;
        Ok(())
    }

    fn stop_trace(&mut self) {
        self.active = false;
    }

    fn is_valid(&self) -> bool {
        self.active
    }

    fn read_trace(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.active {
            self.last_error = "tracing is not active".into();
            return Err(ProbeScopeError::Trace(self.last_error.clone()));
        }
        let Some(mut chunk) = self.script.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            // Keep the remainder for the next read
            chunk.drain(..n);
            self.script.push_front(chunk);
        }
        Ok(n)
    }

    fn timestamp_resolution(&self) -> f64 {
        self.resolution
    }

    fn connected_devices(&self) -> Vec<String> {
        vec!["MOCK-TRACE-0001".into()]
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}
