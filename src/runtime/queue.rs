//! Per-worker task queue.
//!
//! An unbounded MPSC FIFO: any thread may push, only the owning worker
//! drains. `len` counts tasks that are queued *or currently executing*, so a
//! queue never reads as empty while one of its tasks is still running. The
//! driving loop relies on this to avoid declaring quiescence mid-task.

use crate::runtime::task::Task;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct TaskQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    /// Queued plus in-flight tasks.
    pending: AtomicUsize,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            pending: AtomicUsize::new(0),
        }
    }

    /// Append a task. Safe to call from any thread.
    pub fn push(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // The queue owns its receiver, so the channel cannot be disconnected.
        if let Err(err) = self.tx.send(task) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Dropped task for closed queue: {:?}", err.into_inner());
        }
    }

    /// Run every task available right now, blocking up to `timeout` for the
    /// first one. Tasks pushed while draining wait for the next call.
    ///
    /// Returns the number of tasks executed.
    pub fn execute_ready<F>(&self, timeout: Duration, mut run: F) -> usize
    where
        F: FnMut(Task),
    {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return 0,
        };

        let available = self.rx.len();
        let mut executed = 0;
        let mut next = Some(first);
        while let Some(task) = next {
            run(task);
            self.pending.fetch_sub(1, Ordering::SeqCst);
            executed += 1;
            next = if executed <= available {
                self.rx.try_recv().ok()
            } else {
                None
            };
        }
        executed
    }

    /// Queued plus in-flight tasks. Advisory: may be stale by the time the
    /// caller reads it.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending(&self) -> bool {
        !self.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
