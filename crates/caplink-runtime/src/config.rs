use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::RuntimeError;

const CONFIG_FILE: &str = "caplink.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Outgoing-HTTP pool knobs.
///
/// There is no retry setting: the mediator reports failures and the calling
/// component decides whether to try again.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-address cap on in-flight requests and idle keep-alive connections.
    /// Absent means unbounded.
    #[serde(default)]
    pub max_connections_per_target: Option<usize>,
    /// Number of address entries kept before idle ones are evicted, LRU first.
    #[serde(default = "default_max_idle_targets")]
    pub max_idle_targets: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_idle_targets() -> usize {
    64
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_connections_per_target: None,
            max_idle_targets: default_max_idle_targets(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

fn default_reconcile_interval_ms() -> u64 {
    1_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, RuntimeError> {
        toml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from `explicit`, else `./caplink.toml`, else `~/.caplink/caplink.toml`,
    /// else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, RuntimeError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in [PathBuf::from(CONFIG_FILE), Self::default_path()] {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Using runtime config");
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".caplink")
            .join(CONFIG_FILE)
    }
}
