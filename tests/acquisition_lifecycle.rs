//! End-to-end controller sessions against the mock probes: start/stop
//! transitions, data flow into the plots, triggering, health-based aborts,
//! and write-back.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use probescope::acquisition::{
    tracer::channel_series_name, AcqState, ControllerEvent, SamplerController, TraceController,
};
use probescope::config::{
    AcquisitionSettings, TraceChannelKind, TraceSettings, TriggerSettings,
};
use probescope::plot::{Plot, PlotRegistry, VariableRegistry};
use probescope::probe::mock::{MockProbe, MockSignal, MockTraceProbe};
use probescope::probe::{DebugProbe, ProbeSettings};
use probescope::symbols::SampleSink;
use probescope::types::{Variable, VariableType};

const SETTLE: Duration = Duration::from_secs(2);

/// Buffers every accepted row so tests can inspect what the sampler emitted.
#[derive(Clone, Default)]
struct RecordingSink {
    rows: Arc<Mutex<Vec<(f64, Vec<(String, f64)>)>>>,
}

impl SampleSink for RecordingSink {
    fn record(&mut self, timestamp: f64, values: &[(&str, f64)]) {
        let row = values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        self.rows.lock().unwrap().push((timestamp, row));
    }
}

fn shared_plots(plot: Plot) -> Arc<Mutex<PlotRegistry>> {
    let mut registry = PlotRegistry::new();
    registry.add_plot(plot);
    Arc::new(Mutex::new(registry))
}

fn snapshot_of(plots: &Arc<Mutex<PlotRegistry>>, name: &str) -> probescope::plot::PlotSnapshot {
    plots
        .lock()
        .unwrap()
        .plot(name)
        .map(|p| p.snapshot())
        .unwrap_or_default()
}

fn drain_events(events: &Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn wait_for_stop(state: impl Fn() -> AcqState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while state() != AcqState::Stop {
        assert!(Instant::now() < deadline, "controller did not stop in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn sampler_session_collects_data() {
    let probe = MockProbe::new()
        .with_signal(0x2000_0000, MockSignal::Constant(0x42))
        .with_signal(0x2000_0004, MockSignal::Counter { rate_hz: 10_000.0 });

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("status", 0x2000_0000, VariableType::U32));
    vars.insert(Variable::new("ticks", 0x2000_0004, VariableType::U32));

    let mut plot = Plot::new("main");
    plot.add_series("status", 0x2000_0000);
    plot.add_series("ticks", 0x2000_0004);
    let plots = shared_plots(plot);

    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 500,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots.clone(),
        events_tx,
        None,
    );

    assert_eq!(controller.state(), AcqState::Stop);
    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);

    std::thread::sleep(Duration::from_millis(300));

    controller.request_stop();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Stop);

    let snap = snapshot_of(&plots, "main");
    assert!(snap.time.len() >= 50, "only {} samples", snap.time.len());
    assert_eq!(snap.series.len(), 2);
    // Constant channel reads back as its raw value
    let (_, status_values) = &snap.series[0];
    assert!(status_values.iter().all(|&v| v == 0x42 as f64));
    // Timestamps are monotonic
    assert!(snap.time.windows(2).all(|w| w[0] < w[1]));

    let events = drain_events(&events_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::StateChanged(AcqState::Run))));
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::Stats(s) if s.samples_collected > 0)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(_))));
}

#[test]
fn sampler_handles_unaligned_fields_on_aligned_probes() {
    // A two-byte field at an odd address on a probe that rejects unaligned
    // reads; the controller must widen to the containing words
    let probe = MockProbe::new()
        .with_aligned_access()
        .with_region(0x2000_0000, vec![0, 0x34, 0x12, 0, 0, 0, 0, 0]);

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("field", 0x2000_0001, VariableType::U16));

    let mut plot = Plot::new("main");
    plot.add_series("field", 0x2000_0001);
    let plots = shared_plots(plot);

    let (events_tx, _events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 500,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots.clone(),
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(100));
    controller.request_stop();
    controller.wait_settled(SETTLE).unwrap();

    let snap = snapshot_of(&plots, "main");
    assert!(!snap.time.is_empty());
    assert!(snap.series[0].1.iter().all(|&v| v == 0x1234 as f64));
}

#[test]
fn sampler_streaming_probe_uses_probe_timestamps() {
    let probe = MockProbe::new()
        .with_streaming()
        .with_signal(0x2000_0000, MockSignal::Constant(7));

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("value", 0x2000_0000, VariableType::U32));

    let mut plot = Plot::new("main");
    plot.add_series("value", 0x2000_0000);
    let plots = shared_plots(plot);

    let (events_tx, _events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 1000,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots.clone(),
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(200));
    controller.request_stop();
    controller.wait_settled(SETTLE).unwrap();

    let snap = snapshot_of(&plots, "main");
    assert!(snap.time.len() >= 100);
    // Stream entries carry exact probe-side timestamps, one per period
    for pair in snap.time.windows(2) {
        assert!((pair[1] - pair[0] - 0.001).abs() < 1e-9);
    }
}

#[test]
fn sampler_forwards_rows_to_the_sink() {
    let probe = MockProbe::new().with_signal(0x2000_0000, MockSignal::Constant(9));

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("level", 0x2000_0000, VariableType::U32));

    let mut plot = Plot::new("main");
    plot.add_series("level", 0x2000_0000);
    let plots = shared_plots(plot);

    let sink = RecordingSink::default();
    let (events_tx, _events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 500,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots.clone(),
        events_tx,
        Some(Box::new(sink.clone())),
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(200));
    controller.request_stop();
    controller.wait_settled(SETTLE).unwrap();

    let snap = snapshot_of(&plots, "main");
    let rows = sink.rows.lock().unwrap();
    // The sink sees exactly what the plot accepted
    assert_eq!(rows.len(), snap.time.len());
    assert!(rows
        .iter()
        .all(|(_, row)| row == &[("level".to_string(), 9.0)]));
}

#[test]
fn sampler_write_back_reaches_the_target() {
    let probe = MockProbe::new().with_region(0x2000_0000, vec![0u8; 4]);

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("setpoint", 0x2000_0000, VariableType::U32));

    let mut plot = Plot::new("main");
    plot.add_series("setpoint", 0x2000_0000);
    let plots = shared_plots(plot);

    let (events_tx, _events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 500,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots.clone(),
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(50));

    controller.write_variable("setpoint", 42.0).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    controller.request_stop();
    controller.wait_settled(SETTLE).unwrap();

    let snap = snapshot_of(&plots, "main");
    let values = &snap.series[0].1;
    assert_eq!(values.first().copied(), Some(0.0));
    assert_eq!(values.last().copied(), Some(42.0));
}

/// Script one timestamped channel-0 byte write per sample
/// Zero-filled memory whose first read blocks long enough to trip the
/// sampler's fall-behind resync.
struct StallingProbe {
    attached: bool,
    stalled: bool,
}

impl DebugProbe for StallingProbe {
    fn start_acquisition(
        &mut self,
        _settings: &ProbeSettings,
        _watch: &[(u64, usize)],
        _sample_frequency_hz: u32,
    ) -> probescope::error::Result<()> {
        self.attached = true;
        Ok(())
    }

    fn stop_acquisition(&mut self) {
        self.attached = false;
    }

    fn is_valid(&self) -> bool {
        self.attached
    }

    fn read_memory(&mut self, _address: u64, buf: &mut [u8]) -> probescope::error::Result<()> {
        if !self.stalled {
            self.stalled = true;
            std::thread::sleep(Duration::from_millis(1300));
        }
        buf.fill(0);
        Ok(())
    }

    fn write_memory(&mut self, _address: u64, _data: &[u8]) -> probescope::error::Result<()> {
        Ok(())
    }

    fn connected_devices(&self) -> Vec<String> {
        Vec::new()
    }

    fn last_error_msg(&self) -> String {
        String::new()
    }
}

#[test]
fn sampler_stall_resync_does_not_fabricate_samples() {
    let probe = StallingProbe {
        attached: false,
        stalled: false,
    };

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("value", 0x2000_0000, VariableType::U32));

    let mut plot = Plot::new("main");
    plot.add_series("value", 0x2000_0000);
    let plots = shared_plots(plot);

    let sink = RecordingSink::default();
    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 100,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots,
        events_tx,
        Some(Box::new(sink.clone())),
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(1600));
    controller.request_stop();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Stop);

    // The stall resyncs the pacing schedule without inventing collected
    // samples: the stats agree with what the sink actually received
    let rows = sink.rows.lock().unwrap();
    let last_stats = drain_events(&events_rx)
        .into_iter()
        .filter_map(|e| match e {
            ControllerEvent::Stats(s) => Some(s),
            _ => None,
        })
        .last()
        .expect("no stats event");
    assert_eq!(last_stats.samples_collected, rows.len() as u64);
    assert!(last_stats.samples_collected < 100);
    assert!(rows.len() >= 2);
}

fn channel0_stream(values: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in values {
        out.push(0x01); // channel 0, 1 byte
        out.push(v);
        out.extend_from_slice(&[0xC0, 0xE8, 0x07]); // +1000 ticks
    }
    out
}

fn trace_settings(max_points: usize, trigger: TriggerSettings) -> TraceSettings {
    let mut settings = TraceSettings {
        trigger,
        max_points,
        ..Default::default()
    };
    settings.channels[0].enabled = true;
    settings.channels[0].kind = TraceChannelKind::Analog(VariableType::U8);
    settings
}

#[test]
fn trace_session_plots_channel_values() {
    let probe =
        MockTraceProbe::new(1e-6).with_script(vec![channel0_stream(&[10, 20, 30, 40, 50])]);

    let mut plot = Plot::new("trace");
    plot.add_series(channel_series_name(0), 0);
    let plots = shared_plots(plot);

    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = TraceController::spawn(
        Box::new(probe),
        trace_settings(1000, TriggerSettings::default()),
        plots.clone(),
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(300));
    controller.request_stop();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Stop);

    let snap = snapshot_of(&plots, "trace");
    assert_eq!(snap.series[0].1, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
    // Timestamps come from the decoded stream, 1 ms apart
    assert_eq!(snap.time.len(), 5);
    assert!((snap.time[0] - 0.001).abs() < 1e-9);
    assert!((snap.time[4] - 0.005).abs() < 1e-9);

    let indicators = controller.indicators();
    assert_eq!(indicators.error_frames_total, 0);
    assert!(indicators.frames_total >= 10);

    let events = drain_events(&events_rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(_))));
}

#[test]
fn trace_trigger_keeps_pre_trigger_context_and_autostops() {
    // 20 samples below the level, then enough above it to fill 90% of a
    // 100-point capture
    let mut values = vec![5u8; 20];
    values.extend(std::iter::repeat(200u8).take(110));
    let probe = MockTraceProbe::new(1e-6).with_script(vec![channel0_stream(&values)]);

    let mut plot = Plot::new("trace");
    plot.add_series(channel_series_name(0), 0);
    let plots = shared_plots(plot);

    let (events_tx, _events_rx) = crossbeam_channel::bounded(1024);
    let controller = TraceController::spawn(
        Box::new(probe),
        trace_settings(
            100,
            TriggerSettings {
                enabled: true,
                channel: 0,
                level: 100.0,
            },
        ),
        plots.clone(),
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);

    // The capture stops itself once 90 post-trigger samples are in
    wait_for_stop(|| controller.state(), Duration::from_secs(5));

    // Armed samples were plotted too, so the ring holds the tail of the
    // pre-trigger stream ahead of the fired edge
    let snap = snapshot_of(&plots, "trace");
    let values = &snap.series[0].1;
    assert_eq!(values.len(), 100);
    assert!(values[..10].iter().all(|&v| v == 5.0));
    assert!(values[10..].iter().all(|&v| v == 200.0));
}

#[test]
fn trace_error_flood_stops_the_session() {
    // Overflow markers count as error frames; 150 of them crosses the
    // health threshold
    let mut stream = vec![0x70u8; 150];
    stream.extend(channel0_stream(&[1]));
    let probe = MockTraceProbe::new(1e-6).with_script(vec![stream]);

    let mut plot = Plot::new("trace");
    plot.add_series(channel_series_name(0), 0);
    let plots = shared_plots(plot);

    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = TraceController::spawn(
        Box::new(probe),
        trace_settings(1000, TriggerSettings::default()),
        plots,
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);

    wait_for_stop(|| controller.state(), Duration::from_secs(5));

    let events = drain_events(&events_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(msg) if msg.contains("frames"))));
    assert!(controller.indicators().error_frames_total >= 100);
}

#[test]
fn trace_delayed_timestamp_flood_stops_the_session() {
    // 120 delayed timestamps of a single TC code crosses the per-counter
    // threshold
    let stream: Vec<u8> = std::iter::repeat([0xD0u8, 0x05])
        .take(120)
        .flatten()
        .collect();
    let probe = MockTraceProbe::new(1e-6).with_script(vec![stream]);

    let mut plot = Plot::new("trace");
    plot.add_series(channel_series_name(0), 0);
    let plots = shared_plots(plot);

    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = TraceController::spawn(
        Box::new(probe),
        trace_settings(1000, TriggerSettings::default()),
        plots,
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);

    wait_for_stop(|| controller.state(), Duration::from_secs(5));

    let events = drain_events(&events_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(msg) if msg.contains("delayed"))));
    assert!(controller.indicators().delayed_timestamp[0] > 100);
}

#[test]
fn trace_delays_spread_across_tc_codes_are_tolerated() {
    // 40 delayed timestamps per TC code: 120 in total, but no single
    // counter crosses the threshold
    let mut stream = Vec::new();
    for header in [0xD0u8, 0xE0, 0xF0] {
        for _ in 0..40 {
            stream.extend_from_slice(&[header, 0x05]);
        }
    }
    let probe = MockTraceProbe::new(1e-6).with_script(vec![stream]);

    let mut plot = Plot::new("trace");
    plot.add_series(channel_series_name(0), 0);
    let plots = shared_plots(plot);

    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = TraceController::spawn(
        Box::new(probe),
        trace_settings(1000, TriggerSettings::default()),
        plots,
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(controller.state(), AcqState::Run);
    assert_eq!(controller.indicators().delayed_timestamp, [40, 40, 40]);

    controller.request_stop();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Stop);

    let events = drain_events(&events_rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(_))));
}

#[test]
fn trace_silence_stops_the_session() {
    // Empty script: the reader sees no data at all
    let probe = MockTraceProbe::new(1e-6);

    let plots = shared_plots(Plot::new("trace"));
    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = TraceController::spawn(
        Box::new(probe),
        trace_settings(1000, TriggerSettings::default()),
        plots,
        events_tx,
        None,
    );

    controller.request_run();
    assert_eq!(controller.wait_settled(SETTLE).unwrap(), AcqState::Run);

    wait_for_stop(|| controller.state(), Duration::from_secs(5));

    let events = drain_events(&events_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(msg) if msg.contains("no trace data"))));
}

#[test]
fn failed_start_reverts_to_stop_with_error() {
    // No mapped memory: every read fails, so the session aborts shortly
    // after starting
    let probe = MockProbe::new();
    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("ghost", 0x2000_0000, VariableType::U32));

    let plots = shared_plots({
        let mut p = Plot::new("main");
        p.add_series("ghost", 0x2000_0000);
        p
    });

    let (events_tx, events_rx) = crossbeam_channel::bounded(1024);
    let controller = SamplerController::spawn(
        Box::new(probe),
        AcquisitionSettings {
            sample_frequency_hz: 500,
            ..Default::default()
        },
        Arc::new(Mutex::new(vars)),
        plots,
        events_tx,
        None,
    );

    controller.request_run();
    controller.wait_settled(SETTLE).unwrap();

    wait_for_stop(|| controller.state(), Duration::from_secs(5));

    let events = drain_events(&events_rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ControllerEvent::SessionError(_))));
}
