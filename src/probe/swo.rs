//! SWO trace capture over a hardware probe
//!
//! Configures the target's TPIU/ITM for UART-framed SWO output and drains
//! the probe's trace buffer. Local timestamps count core clock cycles, so
//! one tick is `1 / core_frequency_hz` seconds regardless of the SWO baud
//! rate.

use std::io::Read;

use probe_rs::architecture::arm::{component::TraceSink, swo::SwoConfig};
use probe_rs::{MemoryInterface, Session};

use crate::error::{ProbeScopeError, Result};

use super::hardware::{devices_of, open_session, ProbeFamily};
use super::{TraceConfig, TraceProbe};

/// ITM trace enable register; bit N gates stimulus channel N
const ITM_TER0: u64 = 0xE000_0E00;

pub struct SwoTraceProbe {
    family: ProbeFamily,
    session: Option<Session>,
    resolution: f64,
    /// Bytes drained from the probe but not yet handed to the caller
    pending: Vec<u8>,
    last_error: String,
}

impl SwoTraceProbe {
    pub fn new(family: ProbeFamily) -> Self {
        Self {
            family,
            session: None,
            resolution: 0.0,
            pending: Vec::new(),
            last_error: String::new(),
        }
    }

    fn remember<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.last_error = e.to_string();
        }
        result
    }
}

impl TraceProbe for SwoTraceProbe {
    fn start_trace(&mut self, config: &TraceConfig, channel_mask: u32) -> Result<()> {
        self.stop_trace();

        let result = (|| {
            let mut session = open_session(self.family, &config.probe)?;

            let swo = SwoConfig::new(config.core_frequency_hz)
                .set_baud(config.swo_frequency_hz)
                .set_continuous_formatting(false);
            session.setup_tracing(0, TraceSink::Swo(swo))?;

            // Gate stimulus channels to the ones actually plotted
            {
                let mut core = session.core(0)?;
                core.write_word_32(ITM_TER0, channel_mask)?;
            }

            tracing::info!(
                core_hz = config.core_frequency_hz,
                swo_hz = config.swo_frequency_hz,
                mask = format_args!("{channel_mask:#x}"),
                "SWO tracing enabled"
            );
            Ok(session)
        })();

        let session = self.remember(result)?;
        self.resolution = 1.0 / f64::from(config.core_frequency_hz);
        self.pending.clear();
        self.session = Some(session);
        Ok(())
    }

    fn stop_trace(&mut self) {
        if self.session.take().is_some() {
            self.pending.clear();
            tracing::info!("SWO tracing stopped");
        }
    }

    fn is_valid(&self) -> bool {
        self.session.is_some()
    }

    fn read_trace(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = (|| {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| ProbeScopeError::Trace("tracing is not active".into()))?;

            // The reader keeps anything beyond the slice it fills in an
            // internal buffer, so it must be drained completely before it
            // is dropped or those bytes are lost mid-frame.
            let mut reader = session.swo_reader()?;
            let mut chunk = [0u8; 1024];
            loop {
                let n = reader.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                self.pending.extend_from_slice(&chunk[..n]);
            }

            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        })();
        self.remember(result)
    }

    fn timestamp_resolution(&self) -> f64 {
        self.resolution
    }

    fn connected_devices(&self) -> Vec<String> {
        devices_of(self.family)
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}

impl Drop for SwoTraceProbe {
    fn drop(&mut self) {
        self.stop_trace();
    }
}
