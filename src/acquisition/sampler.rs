//! Variable sampling controller
//!
//! Owns a [`DebugProbe`] on a worker thread and polls the enabled
//! variables at the configured rate while the session runs. Each cycle
//! reads every variable, interprets the raw words, and appends one row to
//! every plot that charts any of them.
//!
//! Locking order matters here: the variable registry and plot registry are
//! each locked briefly per cycle, and never across probe I/O.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::config::AcquisitionSettings;
use crate::error::{ProbeScopeError, Result};
use crate::plot::{PlotRegistry, VariableRegistry};
use crate::probe::{read_field, DebugProbe};
use crate::symbols::SampleSink;

use super::state::{AcqState, StateCell};
use super::{try_send_event, ControllerEvent, SessionStats};

const IDLE_SLEEP: Duration = Duration::from_millis(10);
const STATS_INTERVAL: Duration = Duration::from_millis(500);
/// Consecutive failed cycles before the session is forced to stop
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Commands the host can send into a running session
enum SamplerCommand {
    /// Write a new value to a variable on the target
    Write { var_name: String, value: f64 },
}

pub struct SamplerController {
    state: Arc<StateCell>,
    commands: Sender<SamplerCommand>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SamplerController {
    /// Spawn the worker thread. The controller starts stopped; call
    /// [`SamplerController::request_run`] to begin sampling.
    pub fn spawn(
        probe: Box<dyn DebugProbe>,
        settings: AcquisitionSettings,
        variables: Arc<Mutex<VariableRegistry>>,
        plots: Arc<Mutex<PlotRegistry>>,
        events: Sender<ControllerEvent>,
        sink: Option<Box<dyn SampleSink>>,
    ) -> Self {
        let state = Arc::new(StateCell::new());
        let done = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(64);

        let mut worker = SamplerWorker {
            probe,
            settings,
            variables,
            plots,
            events,
            commands: cmd_rx,
            state: state.clone(),
            done: done.clone(),
            sink,
            session_start: None,
            stats: SessionStats::default(),
            cycles_scheduled: 0,
            consecutive_failures: 0,
            last_stats_sent: Instant::now(),
        };
        let handle = std::thread::Builder::new()
            .name("sampler".into())
            .spawn(move || worker.run())
            .ok();

        Self {
            state,
            commands: cmd_tx,
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

    /// Block until the last request was applied by the worker
    pub fn wait_settled(&self, timeout: Duration) -> Result<AcqState> {
        self.state.wait_settled(timeout)
    }

    /// Queue a write of `value` to the named variable. The worker performs
    /// it on its next iteration; only valid while running.
    pub fn write_variable(&self, var_name: impl Into<String>, value: f64) -> Result<()> {
        self.commands
            .try_send(SamplerCommand::Write {
                var_name: var_name.into(),
                value,
            })
            .map_err(|_| ProbeScopeError::SessionStopped("command queue full or closed".into()))
    }
}

impl Drop for SamplerController {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        self.state.request(AcqState::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct SamplerWorker {
    probe: Box<dyn DebugProbe>,
    settings: AcquisitionSettings,
    variables: Arc<Mutex<VariableRegistry>>,
    plots: Arc<Mutex<PlotRegistry>>,
    events: Sender<ControllerEvent>,
    commands: Receiver<SamplerCommand>,
    state: Arc<StateCell>,
    done: Arc<AtomicBool>,
    sink: Option<Box<dyn SampleSink>>,
    session_start: Option<Instant>,
    stats: SessionStats,
    /// Pacing schedule position; advances every cycle whether or not the
    /// reads succeed, so it is not the collected-sample count
    cycles_scheduled: u64,
    consecutive_failures: u32,
    last_stats_sent: Instant,
}

impl SamplerWorker {
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

            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }

            if self.state.current() == AcqState::Run {
                self.sample_cycle();
            } else {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        self.stop_session();
    }

    fn start_session(&mut self) {
        let watch = self.watch_list();
        let result = self.probe.start_acquisition(
            &self.settings.probe,
            &watch,
            self.settings.sample_frequency_hz,
        );
        match result {
            Ok(()) => {
                if let Ok(mut plots) = self.plots.lock() {
                    plots.set_max_points_all(self.settings.max_points);
                    plots.erase_all();
                }
                self.session_start = Some(Instant::now());
                self.stats = SessionStats::default();
                self.cycles_scheduled = 0;
                self.consecutive_failures = 0;
                self.state.apply(AcqState::Run);
                self.send_event(ControllerEvent::StateChanged(AcqState::Run));
                tracing::info!(
                    rate_hz = self.settings.sample_frequency_hz,
                    watched = watch.len(),
                    "sampling started"
                );
            }
            Err(err) => {
                tracing::error!("failed to start sampling: {err}");
                let msg = match self.probe.last_error_msg() {
                    m if m.is_empty() => err.to_string(),
                    m => m,
                };
                self.state.apply(AcqState::Stop);
                self.send_event(ControllerEvent::SessionError(msg));
                self.send_event(ControllerEvent::StateChanged(AcqState::Stop));
            }
        }
    }

    fn stop_session(&mut self) {
        if self.session_start.take().is_some() {
            self.probe.stop_acquisition();
            tracing::info!(
                samples = self.stats.samples_collected,
                failures = self.stats.read_failures,
                "sampling stopped"
            );
            self.send_event(ControllerEvent::Stats(self.stats));
        }
        self.state.apply(AcqState::Stop);
        self.send_event(ControllerEvent::StateChanged(AcqState::Stop));
    }

    /// Deduplicated (address, size) list across the enabled variables
    fn watch_list(&self) -> Vec<(u64, usize)> {
        let Ok(variables) = self.variables.lock() else {
            return Vec::new();
        };
        let set: BTreeSet<(u64, usize)> = variables
            .enabled()
            .map(|v| (v.address, v.var_type.size_bytes()))
            .collect();
        set.into_iter().collect()
    }

    fn sample_cycle(&mut self) {
        let Some(start) = self.session_start else {
            return;
        };

        if self.probe.supports_streaming() {
            self.drain_stream();
            return;
        }

        // Self-paced schedule: cycle N is due at N * period. Resync rather
        // than burst when the probe fell far behind.
        let period = self.settings.sample_period();
        let due = period.mul_f64(self.cycles_scheduled as f64);
        let elapsed = start.elapsed();
        if elapsed < due {
            std::thread::sleep((due - elapsed).min(Duration::from_millis(1)));
            return;
        }
        if elapsed > due + Duration::from_secs(1) {
            self.cycles_scheduled = (elapsed.as_secs_f64() / period.as_secs_f64()) as u64;
        }
        self.cycles_scheduled += 1;

        let vars: Vec<crate::types::Variable> = {
            let Ok(variables) = self.variables.lock() else {
                return;
            };
            variables.enabled().cloned().collect()
        };
        if vars.is_empty() {
            std::thread::sleep(IDLE_SLEEP);
            return;
        }

        let read_start = Instant::now();
        let mut row: Vec<(String, f64)> = Vec::with_capacity(vars.len());
        let mut bytes = 0u64;
        for var in &vars {
            let size = var.var_type.size_bytes();
            match read_field(self.probe.as_mut(), var.address, size) {
                Ok(raw) => {
                    row.push((var.name.clone(), var.interpret(raw)));
                    bytes += size as u64;
                }
                Err(err) => {
                    tracing::debug!("read of '{}' failed: {err}", var.name);
                    self.stats.probe.record_failure();
                }
            }
        }
        let read_us = read_start.elapsed().as_micros() as u64;

        if row.is_empty() {
            self.stats.read_failures += 1;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                tracing::error!("sampling aborted after repeated read failures");
                self.send_event(
                    ControllerEvent::SessionError(self.probe.last_error_msg()),
                );
                self.stop_session();
            }
            return;
        }
        self.consecutive_failures = 0;
        self.stats.probe.record_success(read_us, bytes);
        self.publish(start.elapsed().as_secs_f64(), &row);
    }

    /// Pull everything the probe's own sampling engine has buffered
    fn drain_stream(&mut self) {
        let vars: Vec<crate::types::Variable> = {
            let Ok(variables) = self.variables.lock() else {
                return;
            };
            variables.enabled().cloned().collect()
        };

        loop {
            match self.probe.read_single_entry() {
                Ok(Some(entry)) => {
                    let row: Vec<(String, f64)> = vars
                        .iter()
                        .filter_map(|var| {
                            entry
                                .values
                                .get(&var.address)
                                .map(|&raw| (var.name.clone(), var.interpret(raw)))
                        })
                        .collect();
                    if !row.is_empty() {
                        self.publish(entry.timestamp, &row);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!("stream read failed: {err}");
                    self.stats.read_failures += 1;
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        self.send_event(
                            ControllerEvent::SessionError(self.probe.last_error_msg()),
                        );
                        self.stop_session();
                    }
                    return;
                }
            }
        }
        self.consecutive_failures = 0;
        std::thread::sleep(Duration::from_millis(1));
    }

    /// Append one row to every plot charting any of its variables
    fn publish(&mut self, timestamp: f64, row: &[(String, f64)]) {
        let borrowed: Vec<(&str, f64)> = row.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        if let Ok(mut plots) = self.plots.lock() {
            for plot in plots.iter_mut() {
                if borrowed.iter().any(|(name, _)| plot.series(name).is_some()) {
                    plot.add_sample(timestamp, &borrowed);
                }
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.record(timestamp, &borrowed);
        }

        self.stats.samples_collected += 1;
        if self.last_stats_sent.elapsed() >= STATS_INTERVAL {
            if let Some(start) = self.session_start {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.stats.effective_rate_hz = self.stats.samples_collected as f64 / elapsed;
                }
            }
            self.send_event(ControllerEvent::Stats(self.stats));
            self.last_stats_sent = Instant::now();
        }
    }

    fn handle_command(&mut self, command: SamplerCommand) {
        match command {
            SamplerCommand::Write { var_name, value } => {
                let var = {
                    let Ok(variables) = self.variables.lock() else {
                        return;
                    };
                    variables.get(&var_name).cloned()
                };
                let Some(var) = var else {
                    tracing::warn!("write to unknown variable '{var_name}'");
                    return;
                };
                if !self.probe.is_valid() {
                    tracing::warn!("write to '{var_name}' ignored, no session");
                    return;
                }
                // Undo the fixed point scaling so the target sees the raw
                // typed value
                let typed = match var.fractional {
                    Some(frac) => {
                        value / frac.base * f64::from(1u32 << frac.fractional_bits.min(31))
                    }
                    None => value,
                };
                let bytes = var.var_type.to_bytes(typed);
                if let Err(err) = self.probe.write_memory(var.address, &bytes) {
                    tracing::error!("write to '{var_name}' failed: {err}");
                    self.send_event(
                        ControllerEvent::SessionError(self.probe.last_error_msg()),
                    );
                } else {
                    tracing::debug!("wrote {value} to '{var_name}'");
                }
            }
        }
    }
}
