//! Worker pool and affinity assignment.
//!
//! A fixed set of OS threads, each draining its own [`TaskQueue`]. Every
//! node is pinned to exactly one worker the first time a task targets it;
//! after that all of its tasks go to that worker's queue regardless of who
//! pushes them.
//!
//! # Placement
//!
//! - Pushed on behalf of an executing node pinned to worker `w`: the target
//!   goes to `(w + 1) % size`.
//! - Pushed from outside any node (graph construction): the first worker
//!   with an empty queue wins; if none is empty, [`AffinityFallback`]
//!   decides between the longest and the shortest observed queue.

use crate::config::AffinityFallback;
use crate::runtime::id::WorkerId;
use crate::runtime::node::StreamNode;
use crate::runtime::queue::TaskQueue;
use crate::runtime::Runtime;
use serde::Serialize;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};

thread_local! {
    /// (runtime id, worker) for pool threads; `None` elsewhere.
    static CURRENT_WORKER: Cell<Option<(u64, WorkerId)>> = const { Cell::new(None) };
}

/// The worker of runtime `runtime_id` running on this thread, if any.
pub fn current_worker(runtime_id: u64) -> Option<WorkerId> {
    CURRENT_WORKER.with(|c| match c.get() {
        Some((id, worker)) if id == runtime_id => Some(worker),
        _ => None,
    })
}

/// One pool thread's queue and counters.
pub struct Worker {
    pub id: WorkerId,
    pub queue: TaskQueue,
    executed: AtomicU64,
    failures: AtomicU64,
}

impl Worker {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            queue: TaskQueue::new(),
            executed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            worker: self.id,
            pending: self.queue.len(),
            executed: self.executed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub worker: WorkerId,
    /// Queued plus in-flight tasks.
    pub pending: usize,
    /// Tasks executed since the pool started.
    pub executed: u64,
    /// Callbacks that returned an error or panicked.
    pub failures: u64,
}

pub struct ThreadPool {
    workers: Vec<Arc<Worker>>,
    threads: Vec<Thread>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    fallback: AffinityFallback,
}

impl ThreadPool {
    /// Spawn `size` workers for `runtime`. Workers idle until the runtime is
    /// released.
    pub(crate) fn spawn(runtime: &Runtime, size: usize) -> std::io::Result<Self> {
        let size = size.max(1);
        let config = runtime.config();
        let workers: Vec<Arc<Worker>> = (0..size).map(|i| Arc::new(Worker::new(WorkerId(i)))).collect();

        let mut handles = Vec::with_capacity(size);
        for worker in &workers {
            let runtime = runtime.clone();
            let worker = worker.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, worker.id.index()))
                .spawn(move || worker_loop(runtime, worker))?;
            handles.push(handle);
        }

        let threads = handles.iter().map(|h| h.thread().clone()).collect();
        tracing::info!(
            "Worker pool started: {} workers, {:?} fallback",
            size,
            config.affinity_fallback
        );

        Ok(Self {
            workers,
            threads,
            handles: Mutex::new(handles),
            fallback: config.affinity_fallback,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, id: WorkerId) -> Option<&Worker> {
        self.workers.get(id.index()).map(|w| w.as_ref())
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter().map(|w| w.as_ref())
    }

    /// Resolve `target`'s affinity, pinning it if this is its first task.
    pub fn resolve(&self, target: &StreamNode, caller: Option<WorkerId>) -> WorkerId {
        if let Some(pinned) = target.affinity() {
            return pinned;
        }
        let candidate = match caller {
            Some(caller) => caller.next(self.size()),
            None => select_worker(self.workers.iter().map(|w| w.queue.len()), self.fallback),
        };
        let pinned = target.pin(candidate);
        tracing::trace!("Pinned '{}' to {}", target.name(), pinned);
        pinned
    }

    /// True when no worker has queued or in-flight tasks.
    pub fn is_idle(&self) -> bool {
        self.workers.iter().all(|w| w.queue.is_empty())
    }

    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.stats()).collect()
    }

    pub(crate) fn unpark_all(&self) {
        for thread in &self.threads {
            thread.unpark();
        }
    }

    /// Join every worker thread. Callers must have cleared the running flag.
    pub(crate) fn join(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                tracing::warn!("Worker asked to join itself, skipping");
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked outside a task");
            }
        }
    }
}

/// Pick a worker from observed queue lengths, in index order.
///
/// The first empty queue wins. Otherwise `fallback` picks the longest
/// (`Busiest`) or shortest (`LeastLoaded`) queue, earliest index on ties.
pub fn select_worker<I>(lengths: I, fallback: AffinityFallback) -> WorkerId
where
    I: IntoIterator<Item = usize>,
{
    let mut chosen: Option<(usize, usize)> = None;
    for (index, len) in lengths.into_iter().enumerate() {
        if len == 0 {
            return WorkerId(index);
        }
        let better = match (chosen, fallback) {
            (None, _) => true,
            (Some((_, best)), AffinityFallback::Busiest) => len > best,
            (Some((_, best)), AffinityFallback::LeastLoaded) => len < best,
        };
        if better {
            chosen = Some((index, len));
        }
    }
    WorkerId(chosen.map(|(index, _)| index).unwrap_or(0))
}

fn worker_loop(runtime: Runtime, worker: Arc<Worker>) {
    CURRENT_WORKER.with(|c| c.set(Some((runtime.id(), worker.id))));
    let idle = runtime.config().idle_poll();
    tracing::debug!("{} started", worker.id);

    while runtime.is_running() {
        if !runtime.is_released() {
            thread::park_timeout(idle);
            continue;
        }

        worker
            .queue
            .execute_ready(idle, |task| runtime.execute(&worker, task));

        if worker.queue.is_empty() {
            runtime.tracker().notify_if_idle();
        }
    }

    tracing::debug!("{} exiting", worker.id);
}
