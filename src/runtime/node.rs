//! Stream nodes: one pipeline stage each.
//!
//! A node carries its callbacks, an opaque payload, its pinned worker
//! affinity and the ordered list of downstream destinations. Nodes are
//! shared as [`NodeRef`]s; the graph is built by [`Runtime::connect`] before
//! the pool is released.
//!
//! # Ownership of node state
//!
//! Once a node is pinned to a worker, only that worker ever runs the node's
//! callbacks. The payload is therefore reachable only through
//! [`NodeContext::payload_mut`], and a `NodeContext` is only ever created by
//! the worker that owns the node. The accessor re-checks this on every call.
//!
//! [`Runtime::connect`]: crate::runtime::Runtime::connect

use crate::error::{Result, StreamError};
use crate::runtime::id::{NodeId, WorkerId};
use crate::runtime::pool;
use crate::runtime::task::{Callback, Datum};
use crate::runtime::Runtime;
use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const UNASSIGNED: usize = usize::MAX;
const UNBOUND: u64 = 0;

/// Shared handle to a node.
pub type NodeRef = Arc<StreamNode>;

/// Role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NodeMode {
    /// Graph root. Owns one pipeline lifecycle in the tracker and can never
    /// be a connection target.
    Producer,
    Transform,
    Consumer,
}

pub struct StreamNode {
    id: NodeId,
    name: String,
    mode: NodeMode,
    /// Id of the runtime driving this node, or `UNBOUND`. Written at most once.
    owner: AtomicU64,
    /// Worker index within `owner`'s pool, or `UNASSIGNED`. Written at most once.
    affinity: AtomicUsize,
    on_start: Option<Callback>,
    on_close: Option<Callback>,
    payload: UnsafeCell<Option<Box<dyn Any + Send>>>,
    destinations: RwLock<Vec<NodeRef>>,
    /// Set on the first connect of a producer.
    registered: AtomicBool,
}

// SAFETY: every field except `payload` is Sync on its own. `payload` is only
// dereferenced by `NodeContext`, after checking that the calling thread is the
// pinned worker of the one runtime the node is bound to. Both the binding and
// the pin are write-once, so at most one thread ever passes that check.
unsafe impl Sync for StreamNode {}

impl StreamNode {
    pub fn builder(name: impl Into<String>, mode: NodeMode) -> NodeBuilder {
        NodeBuilder::new(name, mode)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn is_producer(&self) -> bool {
        self.mode == NodeMode::Producer
    }

    /// Id of the runtime this node is bound to, if any.
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            UNBOUND => None,
            id => Some(id),
        }
    }

    /// Bind the node to `runtime_id` unless it is already bound. Fails if
    /// another runtime got there first.
    pub(crate) fn bind(&self, runtime_id: u64) -> Result<()> {
        match self.owner.compare_exchange(
            UNBOUND,
            runtime_id,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(owner) if owner == runtime_id => Ok(()),
            Err(owner) => Err(StreamError::ForeignNode {
                node: self.name.clone(),
                owner,
                runtime: runtime_id,
            }),
        }
    }

    /// The worker this node is pinned to, if it has been scheduled yet.
    pub fn affinity(&self) -> Option<WorkerId> {
        match self.affinity.load(Ordering::Acquire) {
            UNASSIGNED => None,
            index => Some(WorkerId(index)),
        }
    }

    /// Pin the node to `candidate` unless it is already pinned. Returns the
    /// affinity that holds afterwards.
    pub(crate) fn pin(&self, candidate: WorkerId) -> WorkerId {
        match self.affinity.compare_exchange(
            UNASSIGNED,
            candidate.index(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => candidate,
            Err(existing) => WorkerId(existing),
        }
    }

    /// Snapshot of the downstream destinations, in connection order.
    pub fn destinations(&self) -> Vec<NodeRef> {
        self.destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn destination_count(&self) -> usize {
        self.destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn add_destination(&self, destination: NodeRef) {
        self.destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(destination);
    }

    /// Mark this producer's pipeline as registered. True only for the first call.
    pub(crate) fn register_pipeline(&self) -> bool {
        !self.registered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn start_callback(&self) -> Option<&Callback> {
        self.on_start.as_ref()
    }

    pub(crate) fn close_callback(&self) -> Option<&Callback> {
        self.on_close.as_ref()
    }
}

impl fmt::Debug for StreamNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("owner", &self.owner())
            .field("affinity", &self.affinity())
            .field("destinations", &self.destination_count())
            .finish()
    }
}

/// Builder for [`StreamNode`].
pub struct NodeBuilder {
    name: String,
    mode: NodeMode,
    on_start: Option<Callback>,
    on_close: Option<Callback>,
    payload: Option<Box<dyn Any + Send>>,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, mode: NodeMode) -> Self {
        Self {
            name: name.into(),
            mode,
            on_start: None,
            on_close: None,
            payload: None,
        }
    }

    /// Callback run when the node is started. Producers get it once with no
    /// data; other nodes get it once per value emitted to them.
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut NodeContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(f);
        self.on_start = Some(callback);
        self
    }

    /// Callback run once per close delivered to the node.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut NodeContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(f);
        self.on_close = Some(callback);
        self
    }

    pub fn payload<T: Any + Send>(mut self, value: T) -> Self {
        self.payload = Some(Box::new(value));
        self
    }

    pub fn build(self) -> NodeRef {
        Arc::new(StreamNode {
            id: NodeId::next(),
            name: self.name,
            mode: self.mode,
            owner: AtomicU64::new(UNBOUND),
            affinity: AtomicUsize::new(UNASSIGNED),
            on_start: self.on_start,
            on_close: self.on_close,
            payload: UnsafeCell::new(self.payload),
            destinations: RwLock::new(Vec::new()),
            registered: AtomicBool::new(false),
        })
    }
}

/// Handed to a node callback by the worker executing it.
///
/// Holding a `&mut NodeContext` is the capability to touch the node's
/// payload.
pub struct NodeContext<'a> {
    runtime: &'a Runtime,
    node: &'a NodeRef,
    worker: WorkerId,
    data: Option<Datum>,
    /// Set while this context runs the node's close callback.
    closing: bool,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        node: &'a NodeRef,
        worker: WorkerId,
        data: Option<Datum>,
    ) -> Self {
        Self {
            runtime,
            node,
            worker,
            data,
            closing: false,
        }
    }

    pub fn node(&self) -> &NodeRef {
        self.node
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// Worker executing this callback.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Value delivered with this task, if any.
    pub fn data(&self) -> Option<&Datum> {
        self.data.as_ref()
    }

    /// Value delivered with this task, downcast to `T`.
    pub fn data_as<T: Any>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn take_data(&mut self) -> Option<Datum> {
        self.data.take()
    }

    fn check_affinity(&self) -> Result<()> {
        let runtime = self.runtime.id();
        let here = pool::current_worker(runtime);
        if self.node.owner() == Some(runtime) && here.is_some() && here == self.node.affinity() {
            Ok(())
        } else {
            Err(StreamError::NotOnAffinity {
                node: self.node.name().to_string(),
            })
        }
    }

    /// Mutable access to the node's payload.
    ///
    /// Returns `Ok(None)` when the node has no payload of type `T`.
    pub fn payload_mut<T: Any + Send>(&mut self) -> Result<Option<&mut T>> {
        self.check_affinity()?;
        // SAFETY: we are on the node's pinned worker, which runs one task at a
        // time, and this borrow is tied to `&mut self` so no second reference
        // can be produced through this context.
        let slot = unsafe { &mut *self.node.payload.get() };
        Ok(slot.as_mut().and_then(|p| p.downcast_mut::<T>()))
    }

    /// Fan `value` out to every destination.
    pub fn emit(&self, value: Datum) -> Result<()> {
        self.runtime.emit(self.node, value, None)
    }

    /// Fan `value` out, then schedule `next` on this node.
    pub fn emit_then<F>(&self, value: Datum, next: F) -> Result<()>
    where
        F: Fn(&mut NodeContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let next: Callback = Arc::new(next);
        self.runtime.emit(self.node, value, Some(next))
    }

    /// Schedule `next` on this node without emitting.
    pub fn continue_with<F>(&self, next: F) -> Result<()>
    where
        F: Fn(&mut NodeContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.runtime.continue_with(self.node, Arc::new(next))
    }

    /// Close this node now: run its close callback here, then cascade.
    ///
    /// Called from inside the node's own close callback this is a no-op; the
    /// enclosing close cascades once the callback returns.
    pub fn close(&mut self) -> Result<()> {
        if self.closing {
            tracing::trace!("'{}' already closing", self.node.name());
            return Ok(());
        }
        let node = self.node;
        if let Some(callback) = node.close_callback() {
            self.closing = true;
            let result = callback(&mut *self);
            self.closing = false;
            result?;
        }
        self.runtime.cascade_close(node)
    }
}
