//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::sync::{Arc, Mutex};
use streamflow_rs::{Runtime, RuntimeConfig, WorkerId};

/// What a recording node observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Value { node: String, value: u64, worker: WorkerId },
    Close { node: String, worker: WorkerId },
}

impl Event {
    pub fn node(&self) -> &str {
        match self {
            Event::Value { node, .. } | Event::Close { node, .. } => node,
        }
    }

    pub fn worker(&self) -> WorkerId {
        match self {
            Event::Value { worker, .. } | Event::Close { worker, .. } => *worker,
        }
    }
}

/// Shared, thread-safe event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Values received by `node`, in arrival order.
    pub fn values_for(&self, node: &str) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Value { node: n, value, .. } if n == node => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn closes_for(&self, node: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Close { node: n, .. } if n == node))
            .count()
    }

    /// Events recorded for `node`, in arrival order.
    pub fn for_node(&self, node: &str) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.node() == node).collect()
    }
}

/// Runtime with a fixed worker count and a short idle poll.
pub fn test_runtime(workers: usize) -> Runtime {
    let mut config = RuntimeConfig::with_workers(workers);
    config.idle_poll_ms = 1;
    Runtime::new(config)
}
