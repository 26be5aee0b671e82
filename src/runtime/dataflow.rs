//! The runtime handle: graph construction, dispatch, emission, close
//! cascades and the driving loop.
//!
//! ```text
//! connect(P, C)          P is a producer: init pool, register, push P:start
//!   │
//! run() ── release ──►  worker(P) ── emit(v) ──► worker(C): C:start(v)
//!   │                      │ └─ continuation ──► worker(P): P:continue
//!   │                      └─ close ───────────► worker(C): C:close
//!   │                                └─ finish ─► worker(P): tracker -1
//!   └── returns when tracker == 0 and every queue is drained
//! ```

use crate::config::RuntimeConfig;
use crate::error::{Result, StreamError};
use crate::runtime::id::WorkerId;
use crate::runtime::node::{NodeContext, NodeRef};
use crate::runtime::pool::{ThreadPool, Worker, WorkerStats};
use crate::runtime::task::{Callback, Datum, Task, TaskKind};
use crate::runtime::tracker::PipelineTracker;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of runtime counters.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub active_pipelines: usize,
    pub workers: Vec<WorkerStats>,
}

impl RuntimeStats {
    pub fn total_executed(&self) -> u64 {
        self.workers.iter().map(|w| w.executed).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.failures).sum()
    }
}

struct RuntimeInner {
    id: u64,
    config: RuntimeConfig,
    pool: OnceLock<ThreadPool>,
    init_lock: Mutex<()>,
    tracker: PipelineTracker,
    /// Workers drain only once released by `run`.
    released: AtomicBool,
    running: AtomicBool,
}

/// Cheaply cloneable handle to a runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime. The worker pool is not started until the first
    /// producer is connected or [`Runtime::init_pool`] is called.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
                config,
                pool: OnceLock::new(),
                init_lock: Mutex::new(()),
                tracker: PipelineTracker::new(),
                released: AtomicBool::new(false),
                running: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &PipelineTracker {
        &self.inner.tracker
    }

    pub fn pool(&self) -> Option<&ThreadPool> {
        self.inner.pool.get()
    }

    pub(crate) fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start the worker pool if it is not running yet. Idempotent.
    pub fn init_pool(&self) -> Result<&ThreadPool> {
        if let Some(pool) = self.inner.pool.get() {
            return Ok(pool);
        }

        let _guard = self
            .inner
            .init_lock
            .lock()
            .map_err(|_| StreamError::Poisoned("pool init"))?;
        if let Some(pool) = self.inner.pool.get() {
            return Ok(pool);
        }

        let size = self.inner.config.resolve_worker_count();
        let pool = ThreadPool::spawn(self, size).map_err(|e| {
            self.inner.running.store(false, Ordering::Release);
            StreamError::from(e).with_context("Failed to spawn worker pool")
        })?;
        if self.inner.pool.set(pool).is_err() {
            return Err(StreamError::PoolAlreadyInitialized {
                existing: self.pool().map(|p| p.size()).unwrap_or(0),
                requested: size,
            });
        }
        self.inner.pool.get().ok_or(StreamError::PoolNotInitialized)
    }

    /// Queue `task` on its target's worker, binding and pinning the target
    /// first if needed. `caller` is the affinity of the node on whose behalf
    /// the push happens, or `None` outside any node.
    pub fn push(&self, task: Task, caller: Option<WorkerId>) -> Result<WorkerId> {
        let pool = self.pool().ok_or(StreamError::PoolNotInitialized)?;
        task.target.bind(self.id())?;
        let worker = pool.resolve(&task.target, caller);
        let slot = pool.worker(worker).ok_or(StreamError::WorkerOutOfRange {
            worker,
            size: pool.size(),
        })?;
        tracing::trace!("Push {:?} -> {}", task, worker);
        slot.queue.push(task);
        Ok(worker)
    }

    /// Add `destination` to the end of `source`'s fan-out.
    ///
    /// The first connect of a producer starts the pool, registers the
    /// producer's pipeline and schedules its start task.
    pub fn connect(&self, source: &NodeRef, destination: &NodeRef) -> Result<()> {
        if destination.is_producer() {
            tracing::warn!(
                "Rejected connect '{}' -> producer '{}'",
                source.name(),
                destination.name()
            );
            return Err(StreamError::InvalidTopology {
                source_node: source.name().to_string(),
                destination: destination.name().to_string(),
            });
        }

        // A node is driven by exactly one runtime for its whole life
        source.bind(self.id())?;
        destination.bind(self.id())?;

        source.add_destination(destination.clone());
        tracing::debug!("Connected '{}' -> '{}'", source.name(), destination.name());

        if source.is_producer() && source.register_pipeline() {
            self.init_pool()?;
            let active = self.inner.tracker.register();
            let worker = self.push(Task::new(source.clone(), TaskKind::Start, None), None)?;
            tracing::debug!(
                "Producer '{}' scheduled on {} ({} active pipelines)",
                source.name(),
                worker,
                active
            );
        }
        Ok(())
    }

    /// Schedule one start task per destination of `node`, carrying `value`,
    /// then `continuation` on `node` itself if given.
    pub fn emit(&self, node: &NodeRef, value: Datum, continuation: Option<Callback>) -> Result<()> {
        let caller = node.affinity();
        for destination in node.destinations() {
            self.push(
                Task::new(destination, TaskKind::Start, Some(value.clone())),
                caller,
            )?;
        }
        if let Some(next) = continuation {
            self.continue_with(node, next)?;
        }
        Ok(())
    }

    /// Schedule `next` on `node`'s own worker.
    pub fn continue_with(&self, node: &NodeRef, next: Callback) -> Result<()> {
        self.push(
            Task::new(node.clone(), TaskKind::Continue(next), None),
            node.affinity(),
        )?;
        Ok(())
    }

    /// Ask `node` to close. The close callback runs on the node's worker;
    /// from inside the node's own callback use [`NodeContext::close`] to close
    /// synchronously.
    pub fn close(&self, node: &NodeRef) -> Result<()> {
        self.push(Task::new(node.clone(), TaskKind::Close, None), None)?;
        Ok(())
    }

    /// Push a close to every destination and, for a producer, its finish.
    pub(crate) fn cascade_close(&self, node: &NodeRef) -> Result<()> {
        let caller = node.affinity();
        for destination in node.destinations() {
            self.push(Task::new(destination, TaskKind::Close, None), caller)?;
        }
        if node.is_producer() {
            self.push(Task::new(node.clone(), TaskKind::Finish, None), caller)?;
        }
        tracing::debug!("Closed '{}'", node.name());
        Ok(())
    }

    /// Retire `node`'s pipeline from the tracker.
    pub fn pipeline_finish(&self, node: &NodeRef) {
        let remaining = self.inner.tracker.finish();
        tracing::debug!(
            "Pipeline '{}' finished ({} still active)",
            node.name(),
            remaining
        );
    }

    /// Run one dequeued task on `worker`.
    pub(crate) fn execute(&self, worker: &Worker, task: Task) {
        let Task { target, kind, data } = task;
        debug_assert_eq!(target.affinity(), Some(worker.id));
        let label = kind.label();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = NodeContext::new(self, &target, worker.id, data);
            match kind {
                TaskKind::Start => match target.start_callback() {
                    Some(callback) => callback(&mut ctx),
                    None => Ok(()),
                },
                TaskKind::Continue(callback) => callback(&mut ctx),
                TaskKind::Close => ctx.close(),
                TaskKind::Finish => {
                    self.pipeline_finish(&target);
                    Ok(())
                }
            }
        }));

        worker.record_executed();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                worker.record_failure();
                tracing::warn!("'{}' {} failed: {}", target.name(), label, err);
            }
            Err(_) => {
                worker.record_failure();
                tracing::error!("'{}' {} panicked on {}", target.name(), label, worker.id);
            }
        }
    }

    fn release(&self, pool: &ThreadPool) {
        if !self.inner.released.swap(true, Ordering::AcqRel) {
            tracing::info!("Releasing {} workers", pool.size());
            pool.unpark_all();
        }
    }

    /// Drive the runtime until no producer is active and every worker queue
    /// is drained.
    pub fn run(&self) -> Result<()> {
        let pool = self.init_pool()?;
        self.release(pool);
        self.inner.tracker.wait_quiescent(|| pool.is_idle())?;
        tracing::info!("Runtime quiescent");
        Ok(())
    }

    /// Like [`Runtime::run`], but gives up after `timeout`.
    ///
    /// Returns `Ok(true)` once quiescent, `Ok(false)` if producers are still
    /// active or tasks still queued when the timeout expires. The pool keeps
    /// running either way.
    pub fn run_timeout(&self, timeout: Duration) -> Result<bool> {
        let pool = self.init_pool()?;
        self.release(pool);
        let quiescent = self
            .inner
            .tracker
            .wait_quiescent_timeout(timeout, || pool.is_idle())?;
        if quiescent {
            tracing::info!("Runtime quiescent");
        } else {
            tracing::warn!(
                "Runtime not quiescent after {:?} ({} active pipelines)",
                timeout,
                self.inner.tracker.active()
            );
        }
        Ok(quiescent)
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            active_pipelines: self.inner.tracker.active(),
            workers: self.pool().map(|p| p.stats()).unwrap_or_default(),
        }
    }

    /// Stop and join the worker threads. Queued tasks are abandoned.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = self.pool() {
            pool.unpark_all();
            pool.join();
            tracing::info!("Worker pool stopped");
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("workers", &self.pool().map(|p| p.size()))
            .field("active_pipelines", &self.inner.tracker.active())
            .finish()
    }
}
