//! Process-wide default runtime.
//!
//! Most programs build one graph and drive it once. These functions act on
//! a single lazily created runtime configured from the default config file
//! (see [`RuntimeConfig::load_or_default`]).

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::runtime::node::NodeRef;
use crate::runtime::task::{Callback, Datum};
use crate::runtime::Runtime;
use std::sync::OnceLock;

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    /// The process-wide runtime.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Runtime::new(RuntimeConfig::load_or_default()))
    }
}

/// [`Runtime::connect`] on the global runtime.
pub fn connect(source: &NodeRef, destination: &NodeRef) -> Result<()> {
    Runtime::global().connect(source, destination)
}

/// [`Runtime::emit`] on the global runtime.
pub fn emit(node: &NodeRef, value: Datum, continuation: Option<Callback>) -> Result<()> {
    Runtime::global().emit(node, value, continuation)
}

/// [`Runtime::close`] on the global runtime.
pub fn close(node: &NodeRef) -> Result<()> {
    Runtime::global().close(node)
}

/// [`Runtime::run`] on the global runtime.
pub fn run() -> Result<()> {
    Runtime::global().run()
}
