//! SWO trace controller
//!
//! Owns a [`TraceProbe`] and, while running, a [`TraceReader`] thread that
//! feeds the decoder. The controller consumes decoded samples from the
//! ring, applies per-channel interpretation and the trigger, and appends
//! rows to the plots. Channel series are keyed `"ch0"` through `"ch9"`.
//!
//! The stream is watched for health: too many error frames, too many
//! delayed timestamps, or two seconds without data force the session to
//! stop with a diagnostic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::buffer::RingBuffer;
use crate::config::{TraceChannelKind, TraceSettings};
use crate::error::Result;
use crate::plot::PlotRegistry;
use crate::probe::TraceProbe;
use crate::symbols::SampleSink;
use crate::trace::{TraceDecoder, TraceIndicators, TraceReader, TraceSample, TRACE_CHANNELS};

use super::state::{AcqState, StateCell};
use super::{try_send_event, ControllerEvent, SessionStats};

const IDLE_SLEEP: Duration = Duration::from_millis(10);
const POP_TIMEOUT: Duration = Duration::from_millis(100);
const STATS_INTERVAL: Duration = Duration::from_millis(500);
const SAMPLE_QUEUE_CAPACITY: usize = 8192;

/// Error frames tolerated before the stream is declared broken
const MAX_ERROR_FRAMES: u64 = 100;
/// Delayed timestamp packets of a single TC code tolerated before the
/// stream is declared overloaded
const MAX_DELAYED_TIMESTAMPS: u64 = 100;
/// Forced stop after this long without a single decoded sample
const NO_DATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Name of the plot series charting stimulus channel `index`
pub fn channel_series_name(index: usize) -> String {
    format!("ch{index}")
}

pub struct TraceController {
    state: Arc<StateCell>,
    indicators: Arc<Mutex<TraceIndicators>>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TraceController {
    pub fn spawn(
        probe: Box<dyn TraceProbe>,
        settings: TraceSettings,
        plots: Arc<Mutex<PlotRegistry>>,
        events: Sender<ControllerEvent>,
        sink: Option<Box<dyn SampleSink>>,
    ) -> Self {
        let state = Arc::new(StateCell::new());
        let indicators = Arc::new(Mutex::new(TraceIndicators::default()));
        let done = Arc::new(AtomicBool::new(false));

        let mut worker = TraceWorker {
            probe: Arc::new(Mutex::new(probe)),
            settings,
            plots,
            events,
            state: state.clone(),
            indicators: indicators.clone(),
            done: done.clone(),
            sink,
            session: None,
            stats: SessionStats::default(),
            last_stats_sent: Instant::now(),
        };
        let handle = std::thread::Builder::new()
            .name("tracer".into())
            .spawn(move || worker.run())
            .ok();

        Self {
            state,
            indicators,
            done,
            handle,
        }
    }

    pub fn request_run(&self) {
        self.state.request(AcqState::Run);
    }

    pub fn request_stop(&self) {
        self.state.request(AcqState::Stop);
    }

    pub fn state(&self) -> AcqState {
        self.state.current()
    }

    pub fn wait_settled(&self, timeout: Duration) -> Result<AcqState> {
        self.state.wait_settled(timeout)
    }

    /// Stream health counters for the current (or last) session
    pub fn indicators(&self) -> TraceIndicators {
        self.indicators.lock().map(|i| *i).unwrap_or_default()
    }
}

impl Drop for TraceController {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        self.state.request(AcqState::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Per-session resources, dropped together on stop
struct TraceSession {
    reader: TraceReader,
    ring: Arc<RingBuffer<TraceSample>>,
    /// False while an enabled trigger is still waiting to fire
    triggered: bool,
    last_sample_at: Instant,
}

struct TraceWorker {
    probe: Arc<Mutex<Box<dyn TraceProbe>>>,
    settings: TraceSettings,
    plots: Arc<Mutex<PlotRegistry>>,
    events: Sender<ControllerEvent>,
    state: Arc<StateCell>,
    indicators: Arc<Mutex<TraceIndicators>>,
    done: Arc<AtomicBool>,
    sink: Option<Box<dyn SampleSink>>,
    session: Option<TraceSession>,
    stats: SessionStats,
    last_stats_sent: Instant,
}

impl TraceWorker {
    fn send_event(&mut self, event: ControllerEvent) {
        if !try_send_event(&self.events, event) {
            self.stats.events_dropped += 1;
        }
    }

    fn run(&mut self) {
        while !self.done.load(Ordering::Relaxed) {
            if let Some(requested) = self.state.take_request() {
                match requested {
                    AcqState::Run => self.start_session(),
                    AcqState::Stop => self.stop_session(),
                }
            }

            if self.session.is_some() {
                self.consume_cycle();
            } else {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        self.stop_session();
    }

    fn start_session(&mut self) {
        let mask = self.settings.channel_mask();
        let (start_result, resolution) = {
            let Ok(mut probe) = self.probe.lock() else {
                return;
            };
            let result = probe.start_trace(&self.settings.config, mask);
            let resolution = probe.timestamp_resolution();
            (result, resolution)
        };

        match start_result {
            Ok(()) => {
                if let Ok(mut plots) = self.plots.lock() {
                    plots.set_max_points_all(self.settings.max_points);
                    plots.erase_all();
                }
                if let Ok(mut shared) = self.indicators.lock() {
                    *shared = TraceIndicators::default();
                }

                let ring = Arc::new(RingBuffer::new(SAMPLE_QUEUE_CAPACITY));
                let decoder = TraceDecoder::new(resolution, ring.clone());
                let reader =
                    TraceReader::spawn(self.probe.clone(), decoder, self.indicators.clone());

                self.session = Some(TraceSession {
                    reader,
                    ring,
                    triggered: !self.settings.trigger.enabled,
                    last_sample_at: Instant::now(),
                });
                self.stats = SessionStats::default();
                self.state.apply(AcqState::Run);
                self.send_event(ControllerEvent::StateChanged(AcqState::Run));
                tracing::info!(mask = format_args!("{mask:#x}"), "trace session started");
            }
            Err(err) => {
                tracing::error!("failed to start trace: {err}");
                let msg = {
                    let probe_msg = self
                        .probe
                        .lock()
                        .map(|p| p.last_error_msg())
                        .unwrap_or_default();
                    if probe_msg.is_empty() {
                        err.to_string()
                    } else {
                        probe_msg
                    }
                };
                self.state.apply(AcqState::Stop);
                self.send_event(ControllerEvent::SessionError(msg));
                self.send_event(ControllerEvent::StateChanged(AcqState::Stop));
            }
        }
    }

    fn stop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            // Reader first, so nothing reads from a stopped probe
            session.reader.stop();
            if let Ok(mut probe) = self.probe.lock() {
                probe.stop_trace();
            }
            tracing::info!(
                samples = self.stats.samples_collected,
                "trace session stopped"
            );
            self.send_event(ControllerEvent::Stats(self.stats));
        }
        self.state.apply(AcqState::Stop);
        self.send_event(ControllerEvent::StateChanged(AcqState::Stop));
    }

    fn consume_cycle(&mut self) {
        let popped = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let popped = session.ring.pop_timeout(POP_TIMEOUT);
            if popped.is_some() {
                session.last_sample_at = Instant::now();
            } else if session.last_sample_at.elapsed() >= NO_DATA_TIMEOUT {
                self.fail_session("no trace data received, check SWO configuration");
                return;
            }
            popped
        };

        if let Some(sample) = popped {
            self.accept_sample(sample);
        }
        self.check_health();
    }

    fn accept_sample(&mut self, sample: TraceSample) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut row: Vec<(String, f64)> = Vec::new();
        for (i, channel) in self.settings.channels.iter().enumerate().take(TRACE_CHANNELS) {
            if !channel.enabled {
                continue;
            }
            let raw = sample.channels[i];
            let value = match channel.kind {
                TraceChannelKind::Analog(var_type) => var_type.reinterpret(raw),
                // Logic probe convention: the target writes 0xAA for high
                TraceChannelKind::Digital => {
                    if raw == 0xAA {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            row.push((channel_series_name(i), value));
        }

        // Armed samples are still plotted so the buffer keeps pre-trigger
        // context; the fire only restarts the bounded capture count
        if !session.triggered {
            let watched = channel_series_name(self.settings.trigger.channel);
            let fired = row.iter().any(|(name, value)| {
                *name == watched
                    && self
                        .settings
                        .trigger
                        .fires(self.settings.trigger.channel, *value)
            });
            if fired {
                session.triggered = true;
                self.stats.samples_collected = 0;
                tracing::info!(
                    channel = self.settings.trigger.channel,
                    level = self.settings.trigger.level,
                    "trigger fired"
                );
            }
        }
        let triggered = session.triggered;

        let borrowed: Vec<(&str, f64)> = row.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        if let Ok(mut plots) = self.plots.lock() {
            for plot in plots.iter_mut() {
                if borrowed.iter().any(|(name, _)| plot.series(name).is_some()) {
                    plot.add_sample(sample.timestamp, &borrowed);
                }
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.record(sample.timestamp, &borrowed);
        }

        self.stats.samples_collected += 1;
        if self.last_stats_sent.elapsed() >= STATS_INTERVAL {
            self.send_event(ControllerEvent::Stats(self.stats));
            self.last_stats_sent = Instant::now();
        }

        // A triggered capture ends once the buffers are nearly full, so the
        // fired edge stays in view with pre-trigger samples ahead of it
        if self.settings.trigger.enabled
            && triggered
            && self.stats.samples_collected >= (self.settings.max_points * 9 / 10) as u64
        {
            tracing::info!("triggered capture complete");
            self.stop_session();
        }
    }

    fn check_health(&mut self) {
        let snapshot = self.indicators.lock().map(|i| *i).unwrap_or_default();
        if snapshot.error_frames_total > MAX_ERROR_FRAMES {
            self.fail_session("too many malformed trace frames, check SWO speed");
        } else if snapshot
            .delayed_timestamp
            .iter()
            .any(|&count| count > MAX_DELAYED_TIMESTAMPS)
        {
            self.fail_session("trace timestamps are delayed, reduce data rate");
        }
    }

    fn fail_session(&mut self, message: &str) {
        tracing::error!("{message}");
        self.send_event(
            ControllerEvent::SessionError(message.to_string()),
        );
        self.stop_session();
    }
}
