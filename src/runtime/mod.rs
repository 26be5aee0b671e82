//! Execution core: stream nodes, the worker pool and the dataflow protocol.
//!
//! Work is scheduled per node onto a fixed pool of worker threads. Each node
//! is pinned to one worker the first time a task targets it, so node-local
//! state never needs a lock. Producers keep themselves alive by pushing
//! continuations rather than looping, which lets a worker interleave every
//! node it owns.
//!
//! # Architecture
//!
//! ```text
//! [Producer] ──emit──► [Transform] ──emit──► [Consumer]
//!      │                                 └──► [Consumer]
//!      └── close ─► cascades downstream, then retires the pipeline
//! ```
//!
//! - **`TaskQueue`**: one FIFO per worker, any thread pushes.
//! - **`ThreadPool`**: the workers and the affinity policy.
//! - **`PipelineTracker`**: active-producer count plus quiescence signal.
//! - **`Runtime`**: connect / emit / close / run.

pub mod dataflow;
pub mod global;
pub mod id;
pub mod node;
pub mod pool;
pub mod queue;
pub mod task;
pub mod tracker;

pub use dataflow::{Runtime, RuntimeStats};
pub use id::{NodeId, WorkerId};
pub use node::{NodeBuilder, NodeContext, NodeMode, NodeRef, StreamNode};
pub use pool::{ThreadPool, WorkerStats};
pub use queue::TaskQueue;
pub use task::{datum, Callback, Datum, Task, TaskKind};
pub use tracker::PipelineTracker;
