//! Demo binary: runs a short sampling session against the mock probe and
//! prints what landed in the plots. Useful as a smoke test without
//! hardware; point `RUST_LOG` at `probescope=debug` for the full story.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use probescope::acquisition::{ControllerEvent, SamplerController};
use probescope::config::AcquisitionSettings;
use probescope::plot::{Plot, PlotRegistry, VariableRegistry};
use probescope::probe::mock::{MockProbe, MockSignal};
use probescope::probe::list_probes;
use probescope::types::{Variable, VariableType};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,probescope=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting probescope demo");

    let probes = list_probes();
    if probes.is_empty() {
        tracing::info!("no hardware probes attached, using the mock probe");
    }
    for info in &probes {
        tracing::info!("found probe: {info}");
    }

    let probe = MockProbe::new()
        .with_signal(
            0x2000_0000,
            MockSignal::Sine {
                amplitude: 2.5,
                frequency_hz: 1.0,
                offset: 0.0,
            },
        )
        .with_signal(0x2000_0004, MockSignal::Counter { rate_hz: 1000.0 });

    let mut vars = VariableRegistry::new();
    vars.insert(Variable::new("sine_wave", 0x2000_0000, VariableType::F32));
    vars.insert(Variable::new("tick_count", 0x2000_0004, VariableType::U32));

    let mut plots = PlotRegistry::new();
    let mut plot = Plot::new("demo");
    plot.add_series("sine_wave", 0x2000_0000);
    plot.add_series("tick_count", 0x2000_0004);
    plots.add_plot(plot);

    let plots = Arc::new(Mutex::new(plots));
    let (events_tx, events_rx) = crossbeam_channel::bounded(256);

    let settings = AcquisitionSettings {
        sample_frequency_hz: 200,
        ..Default::default()
    };
    let controller = SamplerController::spawn(
        Box::new(probe),
        settings,
        Arc::new(Mutex::new(vars)),
        plots.clone(),
        events_tx,
        None,
    );

    controller.request_run();
    controller
        .wait_settled(Duration::from_secs(2))
        .context("sampling session did not start")?;

    std::thread::sleep(Duration::from_secs(2));

    controller.request_stop();
    controller
        .wait_settled(Duration::from_secs(2))
        .context("sampling session did not stop")?;

    while let Ok(event) = events_rx.try_recv() {
        match event {
            ControllerEvent::Stats(stats) => tracing::info!(
                samples = stats.samples_collected,
                rate_hz = format_args!("{:.1}", stats.effective_rate_hz),
                avg_read_us = format_args!("{:.1}", stats.probe.avg_read_time_us()),
                "session stats"
            ),
            ControllerEvent::StateChanged(state) => tracing::debug!("state: {state}"),
            ControllerEvent::SessionError(msg) => tracing::error!("session error: {msg}"),
        }
    }

    let plots = plots
        .lock()
        .map_err(|_| anyhow::anyhow!("plot registry lock poisoned"))?;
    let snapshot = plots.plot("demo").context("demo plot missing")?.snapshot();
    println!("collected {} samples", snapshot.time.len());
    for (name, values) in &snapshot.series {
        let last = values.last().copied().unwrap_or(0.0);
        println!("  {name}: {} points, last = {last:.4}", values.len());
    }

    Ok(())
}
