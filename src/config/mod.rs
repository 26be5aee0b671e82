//! Configuration module for the streamflow runtime
//!
//! This module handles runtime configuration:
//! - Worker pool sizing (explicit, environment override, or detected CPU count)
//! - Worker idle polling interval
//! - Affinity fallback policy for new nodes when no worker is idle
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory under
//! `streamflow-rs/runtime.toml`:
//!
//! - **Linux**: `~/.config/streamflow-rs/runtime.toml`
//! - **macOS**: `~/Library/Application Support/streamflow-rs/runtime.toml`
//! - **Windows**: `%APPDATA%\streamflow-rs\runtime.toml`
//!
//! # Example
//!
//! ```toml
//! worker_threads = 4
//! idle_poll_ms = 5
//! affinity_fallback = "busiest"
//! thread_name_prefix = "stream-worker"
//! ```

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "streamflow-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "runtime.toml";

/// Environment variable overriding the worker pool size
pub const THREADS_ENV: &str = "STREAMFLOW_THREADS";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Where a node lands when it is first scheduled from outside any worker
/// and every worker already has queued work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityFallback {
    /// Pin to the worker with the longest observed queue.
    #[default]
    Busiest,
    /// Pin to the worker with the shortest observed queue.
    LeastLoaded,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Explicit worker pool size. `None` or 0 defers to the environment
    /// override, then to the detected CPU count.
    pub worker_threads: Option<usize>,

    /// How long an idle worker blocks on its queue before re-checking
    /// quiescence, in milliseconds
    pub idle_poll_ms: u64,

    /// Placement policy when no worker is idle
    pub affinity_fallback: AffinityFallback,

    /// Prefix for worker thread names
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            idle_poll_ms: 5,
            affinity_fallback: AffinityFallback::Busiest,
            thread_name_prefix: "stream-worker".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Create a config with an explicit worker count
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_threads: Some(workers),
            ..Self::default()
        }
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml_str(&content).map_err(|e| e.with_context(format!("{:?}", path)))
    }

    /// Load config from the default location, returning defaults if any error occurs
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load runtime config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StreamError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| StreamError::Config(format!("Failed to write config: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.idle_poll_ms == 0 {
            return Err(StreamError::Config(
                "idle_poll_ms must be greater than zero".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(StreamError::Config(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker idle polling interval
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    /// Resolve the worker pool size.
    ///
    /// Explicit `worker_threads` wins, then a positive `STREAMFLOW_THREADS`,
    /// then the detected CPU count. Never returns less than 1.
    pub fn resolve_worker_count(&self) -> usize {
        if let Some(n) = self.worker_threads.filter(|&n| n > 0) {
            return n;
        }
        if let Some(n) = env_worker_count() {
            return n;
        }
        num_cpus::get().max(1)
    }
}

/// Read the worker count override from the environment, ignoring
/// non-numeric and non-positive values.
fn env_worker_count() -> Option<usize> {
    let raw = std::env::var(THREADS_ENV).ok()?;
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Some(n as usize),
        Ok(_) => None,
        Err(_) => {
            tracing::warn!("Ignoring non-numeric {}={:?}", THREADS_ENV, raw);
            None
        }
    }
}
