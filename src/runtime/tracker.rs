//! Active-producer accounting and the quiescence signal.
//!
//! The count goes up once per producer registration and down once per
//! `pipeline_finish`. The condition variable is signalled when the count
//! reaches zero and whenever a worker drains its queue while the count is
//! zero; the driving loop re-checks the worker queues on every wake.

use crate::error::{Result, StreamError};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct PipelineTracker {
    active: Mutex<usize>,
    signal: Condvar,
}

impl PipelineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more running producer. Returns the new count.
    pub fn register(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        *active
    }

    /// Retire one producer. Returns the new count.
    ///
    /// A finish with no registered producer is logged and ignored so the
    /// count never goes negative.
    pub fn finish(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active == 0 {
            tracing::error!("pipeline_finish with no active pipelines");
            return 0;
        }
        *active -= 1;
        if *active == 0 {
            self.signal.notify_all();
        }
        *active
    }

    pub fn active(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the driving loop if no pipelines remain.
    pub fn notify_if_idle(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active == 0 {
            self.signal.notify_all();
        }
    }

    /// Block until the count is zero and `drained` holds.
    ///
    /// `drained` is evaluated with the tracker lock held, so a worker that
    /// drains its queue after the check cannot signal before this thread is
    /// waiting.
    pub fn wait_quiescent<F>(&self, mut drained: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let mut active = self
            .active
            .lock()
            .map_err(|_| StreamError::Poisoned("pipeline tracker"))?;
        loop {
            if *active == 0 && drained() {
                return Ok(());
            }
            active = self
                .signal
                .wait(active)
                .map_err(|_| StreamError::Poisoned("pipeline tracker"))?;
        }
    }

    /// [`PipelineTracker::wait_quiescent`] bounded by `timeout`. Returns
    /// whether quiescence was reached.
    pub fn wait_quiescent_timeout<F>(&self, timeout: Duration, mut drained: F) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut active = self
            .active
            .lock()
            .map_err(|_| StreamError::Poisoned("pipeline tracker"))?;
        loop {
            if *active == 0 && drained() {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            active = self
                .signal
                .wait_timeout(active, remaining)
                .map_err(|_| StreamError::Poisoned("pipeline tracker"))?
                .0;
        }
    }
}
