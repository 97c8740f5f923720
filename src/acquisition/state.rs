//! Session state machine
//!
//! Controllers own their probe on a worker thread, so state changes are
//! requested by the host and applied by the worker: `request` records the
//! desired state, the worker picks it up with `take_request` and calls
//! `apply` once the transition (probe attach, detach) actually happened.
//! Hosts that need the settled state block on `wait_settled`.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ProbeScopeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcqState {
    #[default]
    Stop,
    Run,
}

impl std::fmt::Display for AcqState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcqState::Stop => write!(f, "stopped"),
            AcqState::Run => write!(f, "running"),
        }
    }
}

#[derive(Debug, Default)]
struct StateInner {
    current: AcqState,
    requested: Option<AcqState>,
}

/// Shared state cell between host and worker thread
#[derive(Debug, Default)]
pub struct StateCell {
    inner: Mutex<StateInner>,
    settled: Condvar,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to move to `state`. A request to the current state is
    /// dropped so `wait_settled` cannot hang on a no-op.
    pub fn request(&self, state: AcqState) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.current == state {
                inner.requested = None;
            } else {
                inner.requested = Some(state);
            }
            self.settled.notify_all();
        }
    }

    /// Worker side: take the pending request, if any
    pub fn take_request(&self) -> Option<AcqState> {
        self.inner.lock().ok().and_then(|mut inner| inner.requested.take())
    }

    /// Worker side: record that the transition finished
    pub fn apply(&self, state: AcqState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.current = state;
            self.settled.notify_all();
        }
    }

    /// Current state, which may still have a pending request against it
    pub fn current(&self) -> AcqState {
        self.inner.lock().map(|inner| inner.current).unwrap_or_default()
    }

    /// Block until no request is pending, returning the settled state.
    /// Fails with [`ProbeScopeError::Timeout`] if the worker does not
    /// process the request in time.
    pub fn wait_settled(&self, timeout: Duration) -> Result<AcqState> {
        let deadline = Instant::now() + timeout;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ProbeScopeError::Config("state lock poisoned".into()))?;
        while inner.requested.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return Err(ProbeScopeError::Timeout(
                    "state transition not applied in time".into(),
                ));
            }
            let (guard, result) = self
                .settled
                .wait_timeout(inner, deadline - now)
                .map_err(|_| ProbeScopeError::Config("state lock poisoned".into()))?;
            inner = guard;
            if result.timed_out() && inner.requested.is_some() {
                return Err(ProbeScopeError::Timeout(
                    "state transition not applied in time".into(),
                ));
            }
        }
        Ok(inner.current)
    }
}
