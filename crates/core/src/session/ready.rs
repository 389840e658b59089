use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PrepareError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Pending,
    Ready,
    Cancelled,
    Failed(String),
}

/// One-shot readiness latch with timeout and cancellation.
///
/// `prepare` and pending seeks [`reset`](Self::reset) it under the control
/// lock, then [`wait`](Self::wait). The producer opens it; teardown cancels
/// it without taking the control lock, which is what lets teardown interrupt
/// a blocked control call. The first outcome after a reset wins.
#[derive(Debug)]
pub(crate) struct ReadyGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ReadyGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Pending),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn reset(&self) {
        *self.state.lock() = GateState::Pending;
    }

    pub(crate) fn open(&self) {
        self.settle(GateState::Ready);
    }

    pub(crate) fn cancel(&self) {
        self.settle(GateState::Cancelled);
    }

    pub(crate) fn fail(&self, reason: &str) {
        self.settle(GateState::Failed(reason.to_string()));
    }

    fn settle(&self, outcome: GateState) {
        let mut state = self.state.lock();
        if *state == GateState::Pending {
            *state = outcome;
            self.cond.notify_all();
        }
    }

    /// Block until the gate settles or `timeout` elapses.
    pub(crate) fn wait(&self, timeout: Duration) -> Result<(), PrepareError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state == GateState::Pending {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match &*state {
            GateState::Ready => Ok(()),
            GateState::Pending => Err(PrepareError::Timeout(timeout)),
            GateState::Cancelled => Err(PrepareError::Cancelled),
            GateState::Failed(reason) => Err(PrepareError::Failed(reason.clone())),
        }
    }
}
