//! SWO reader thread
//!
//! Pulls raw bytes from the trace probe as fast as it delivers them and
//! feeds the decoder. When the probe has nothing buffered, the reader
//! sleeps briefly and counts the idle cycle so the controller can detect a
//! silent stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::probe::TraceProbe;

use super::{TraceDecoder, TraceIndicators};

const READ_CHUNK: usize = 8192;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

pub struct TraceReader {
    handle: Option<JoinHandle<()>>,
    done: Arc<AtomicBool>,
}

impl TraceReader {
    /// Spawn the reader thread. It runs until [`TraceReader::stop`] or drop.
    pub fn spawn(
        probe: Arc<Mutex<Box<dyn TraceProbe>>>,
        mut decoder: TraceDecoder,
        indicators: Arc<Mutex<TraceIndicators>>,
    ) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let thread_done = done.clone();
        let handle = std::thread::Builder::new()
            .name("trace-reader".into())
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK];
                let mut sleep_cycles = 0u64;
                while !thread_done.load(Ordering::Relaxed) {
                    let read = {
                        let Ok(mut probe) = probe.lock() else {
                            break;
                        };
                        probe.read_trace(&mut buf)
                    };
                    match read {
                        Ok(0) => {
                            sleep_cycles += 1;
                            publish(&indicators, &decoder, sleep_cycles);
                            std::thread::sleep(IDLE_SLEEP);
                        }
                        Ok(n) => {
                            decoder.process_data(&buf[..n]);
                            publish(&indicators, &decoder, sleep_cycles);
                        }
                        Err(err) => {
                            tracing::error!("trace read failed: {err}");
                            sleep_cycles += 1;
                            publish(&indicators, &decoder, sleep_cycles);
                            std::thread::sleep(IDLE_SLEEP);
                        }
                    }
                }
            })
            .ok();
        Self { handle, done }
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TraceReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish(shared: &Mutex<TraceIndicators>, decoder: &TraceDecoder, sleep_cycles: u64) {
    if let Ok(mut snapshot) = shared.lock() {
        *snapshot = decoder.indicators();
        snapshot.sleep_cycles = sleep_cycles;
    }
}
