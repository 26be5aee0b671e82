//! # streamflow-rs: stream pipeline execution core
//!
//! Schedules the stages of a dataflow graph onto a fixed pool of worker
//! threads, fans emitted values out to downstream stages, cascades closes
//! through the graph and detects when every producer pipeline has drained.
//!
//! ## Architecture
//!
//! - **Nodes**: stages with a start/close callback pair, an opaque payload
//!   and an ordered list of destinations
//! - **Worker pool**: one queue per OS thread; each node is pinned to one
//!   worker for life, so its payload is never shared between threads
//! - **Tracker**: counts running producers and wakes the driving loop
//! - **Communication**: crossbeam channels carry tasks to workers
//!
//! ## Example
//!
//! ```no_run
//! use streamflow_rs::{datum, NodeMode, Runtime, RuntimeConfig, StreamNode};
//!
//! fn count(ctx: &mut streamflow_rs::NodeContext<'_>) -> streamflow_rs::Result<()> {
//!     let next = match ctx.payload_mut::<u32>()? {
//!         Some(n) if *n < 3 => {
//!             *n += 1;
//!             Some(*n)
//!         }
//!         _ => None,
//!     };
//!     match next {
//!         Some(n) => ctx.emit_then(datum(n), count),
//!         None => ctx.close(),
//!     }
//! }
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let producer = StreamNode::builder("counter", NodeMode::Producer)
//!     .payload(0u32)
//!     .on_start(count)
//!     .build();
//! let printer = StreamNode::builder("printer", NodeMode::Consumer)
//!     .on_start(|ctx| {
//!         println!("{:?}", ctx.data_as::<u32>());
//!         Ok(())
//!     })
//!     .build();
//!
//! runtime.connect(&producer, &printer)?;
//! runtime.run()?;
//! # Ok::<(), streamflow_rs::StreamError>(())
//! ```

pub mod config;
pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use config::{AffinityFallback, RuntimeConfig};
pub use error::{Result, ResultExt, StreamError};
pub use runtime::{
    datum, Datum, NodeContext, NodeId, NodeMode, NodeRef, Runtime, RuntimeStats, StreamNode,
    WorkerId,
};
