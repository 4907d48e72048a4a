//! Start gate holding workers back until the pool is saturated.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// How workers are held back before running their upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartGate {
    /// Each worker sleeps a fixed time before running.
    Delay(Duration),
    /// Workers wait until every dispatched worker has arrived, then all are
    /// released together.
    Barrier,
}

impl Default for StartGate {
    fn default() -> Self {
        Self::Delay(Duration::from_millis(200))
    }
}

#[derive(Debug, Default)]
struct GateState {
    arrived: usize,
    open: bool,
}

/// Shared runtime side of a [`StartGate`].
///
/// Unlike `std::sync::Barrier` the party count is fixed only when the
/// orchestrator calls [`Gate::release_when_arrived`], so a worker that
/// failed to spawn cannot leave the rest waiting forever.
#[derive(Debug)]
pub(crate) struct Gate {
    mode: StartGate,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    pub(crate) fn new(mode: StartGate) -> Self {
        Self {
            mode,
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by each worker before it runs.
    pub(crate) fn arrive(&self) {
        match self.mode {
            StartGate::Delay(delay) => thread::sleep(delay),
            StartGate::Barrier => {
                let mut state = self.lock();
                state.arrived += 1;
                self.changed.notify_all();
                while !state.open {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Called by the orchestrator once dispatch is done. Blocks until
    /// `expected` workers arrived, then opens the gate.
    pub(crate) fn release_when_arrived(&self, expected: usize) {
        if self.mode != StartGate::Barrier {
            return;
        }
        let mut state = self.lock();
        while state.arrived < expected {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.open = true;
        self.changed.notify_all();
        tracing::debug!(workers = expected, "start gate released");
    }
}
