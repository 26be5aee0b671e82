//! Scheduled units of work.

use crate::error::Result;
use crate::runtime::node::{NodeContext, NodeRef};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased value flowing between nodes.
///
/// Shared rather than owned so one emission can fan out to every
/// destination without copying.
pub type Datum = Arc<dyn Any + Send + Sync>;

/// Wrap a value as a [`Datum`].
pub fn datum<T: Any + Send + Sync>(value: T) -> Datum {
    Arc::new(value)
}

/// A node callback. Runs on the node's assigned worker.
pub type Callback = Arc<dyn Fn(&mut NodeContext<'_>) -> Result<()> + Send + Sync>;

/// What a task does when its worker dequeues it.
#[derive(Clone)]
pub enum TaskKind {
    /// Invoke the target's start callback with the task's data.
    Start,
    /// Invoke a continuation the target pushed for itself.
    Continue(Callback),
    /// Run the close protocol on the target.
    Close,
    /// Retire the target's pipeline from the tracker.
    Finish,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Start => "start",
            TaskKind::Continue(_) => "continue",
            TaskKind::Close => "close",
            TaskKind::Finish => "finish",
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A unit of work bound to one node, executed exactly once on the worker
/// that dequeues it.
pub struct Task {
    pub target: NodeRef,
    pub kind: TaskKind,
    pub data: Option<Datum>,
}

impl Task {
    pub fn new(target: NodeRef, kind: TaskKind, data: Option<Datum>) -> Self {
        Self { target, kind, data }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("target", &self.target.name())
            .field("kind", &self.kind)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}
