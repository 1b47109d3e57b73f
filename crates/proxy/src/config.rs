//! Configuration surface of the proxy.
//!
//! Every option is optional; the zero-config default listens on port 9999
//! with automatically sized workers. Configuration is plain JSON:
//!
//! ```json
//! {
//!     "listen_port": 8888,
//!     "worker_threads": "auto"
//! }
//! ```
//!
//! `worker_threads` accepts either an integer or the string `"auto"`,
//! which applies `max(4, hardware_concurrency - 1)`.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::server::default_worker_threads;

pub const DEFAULT_LISTEN_PORT: u16 = 9999;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },
}

/// Worker-thread sizing: explicit, or derived from the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WorkerThreads {
    Fixed(usize),
    Auto(AutoKeyword),
}

/// The literal string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoKeyword {
    Auto,
}

impl Default for WorkerThreads {
    fn default() -> Self {
        Self::Auto(AutoKeyword::Auto)
    }
}

/// Recognized proxy options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// TCP port to bind on IPv4.
    pub listen_port: u16,
    /// Size of the I/O runtime's worker pool.
    pub worker_threads: WorkerThreads,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { listen_port: DEFAULT_LISTEN_PORT, worker_threads: WorkerThreads::default() }
    }
}

impl ProxyConfig {
    /// Parses a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// The worker count to build the runtime with.
    pub fn resolved_worker_threads(&self) -> usize {
        match self.worker_threads {
            WorkerThreads::Fixed(n) if n > 0 => n,
            _ => default_worker_threads(),
        }
    }
}
