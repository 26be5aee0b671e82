//! Error handling for the streamflow runtime
//!
//! This module defines the runtime's error type and a Result alias for use
//! throughout the crate. Errors here are construction-time and precondition
//! failures; data-level errors belong to the stage callbacks themselves.

use crate::runtime::WorkerId;
use thiserror::Error;

/// Main error type for streamflow operations
#[derive(Error, Debug)]
pub enum StreamError {
    /// A producer was used as the target of a connection
    #[error("Invalid topology: cannot connect '{source_node}' to producer '{destination}'")]
    InvalidTopology {
        source_node: String,
        destination: String,
    },

    /// A task was pushed before the worker pool existed
    #[error("Worker pool is not initialized")]
    PoolNotInitialized,

    /// The worker pool was initialized a second time with a different size
    #[error("Worker pool already initialized with {existing} workers (requested {requested})")]
    PoolAlreadyInitialized { existing: usize, requested: usize },

    /// Node-local state was touched from a thread other than the node's worker
    #[error("Node '{node}' accessed off its assigned worker")]
    NotOnAffinity { node: String },

    /// A node already bound to another runtime was handed to this one
    #[error("Node '{node}' belongs to runtime {owner}, not runtime {runtime}")]
    ForeignNode {
        node: String,
        owner: u64,
        runtime: u64,
    },

    /// A task resolved to a worker the pool does not have
    #[error("{worker} is out of range for a pool of {size} workers")]
    WorkerOutOfRange { worker: WorkerId, size: usize },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A shared lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StreamError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &StreamError {
        match self {
            StreamError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<toml::de::Error> for StreamError {
    fn from(err: toml::de::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for StreamError {
    fn from(err: toml::ser::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

/// Result type alias for streamflow operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<StreamError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
