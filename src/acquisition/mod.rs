//! Acquisition controllers
//!
//! Two controllers drive data into the plots, each owning its probe on a
//! dedicated worker thread:
//!
//! - [`SamplerController`] polls variables over SWD at a configured rate
//! - [`TraceController`] consumes the decoded SWO stream
//!
//! Hosts talk to a controller through its [`state::StateCell`] (start and
//! stop requests) and receive [`ControllerEvent`]s over a bounded
//! crossbeam channel. Events are dropped rather than blocking the worker
//! when the host falls behind.

pub mod sampler;
pub mod state;
pub mod tracer;

pub use sampler::SamplerController;
pub use state::{AcqState, StateCell};
pub use tracer::TraceController;

use crossbeam_channel::Sender;

use crate::probe::ProbeStats;

/// Counters for one acquisition session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    /// Sample rows accepted into the plots
    pub samples_collected: u64,
    /// Read cycles that failed entirely
    pub read_failures: u64,
    /// Achieved sample rate over the session so far
    pub effective_rate_hz: f64,
    /// Events lost because the host's channel was full
    pub events_dropped: u64,
    pub probe: ProbeStats,
}

/// Messages from a controller's worker thread to the host
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    StateChanged(AcqState),
    /// The session had to stop or failed to start; carries a message fit
    /// for display
    SessionError(String),
    Stats(SessionStats),
}

/// Forward an event without blocking the worker; a full or disconnected
/// channel drops it. Returns whether the event was delivered so callers
/// can count the loss.
pub(crate) fn try_send_event(events: &Sender<ControllerEvent>, event: ControllerEvent) -> bool {
    match events.try_send(event) {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!("controller event dropped: {e}");
            false
        }
    }
}
