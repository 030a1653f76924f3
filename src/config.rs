//! TOML-backed configuration for the chunkserver core.
//!
//! Kept intentionally small: the real daemon's configuration surface
//! (ACLs, label selectors, master connection retries, ...) is out of scope
//! for the data plane implemented here. Defaults live in code, not in the
//! file format, matching the teacher's datastore config style.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_worker_threads() -> usize {
    4
}

fn default_bind_address() -> String {
    "0.0.0.0:9422".to_string()
}

fn default_wave_timeout_ms() -> u64 {
    500
}

fn default_connection_timeout_ms() -> u64 {
    1_000
}

fn default_total_timeout_ms() -> u64 {
    60_000
}

fn default_defective_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directories this chunkserver stores chunks under.
    pub disk_roots: Vec<PathBuf>,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_wave_timeout_ms")]
    pub replicator_wave_timeout_ms: u64,

    #[serde(default = "default_connection_timeout_ms")]
    pub replicator_connection_timeout_ms: u64,

    #[serde(default = "default_total_timeout_ms")]
    pub replicator_total_timeout_ms: u64,

    #[serde(default = "default_defective_timeout_ms")]
    pub defective_timeout_ms: u64,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn replicator_wave_timeout(&self) -> Duration {
        Duration::from_millis(self.replicator_wave_timeout_ms)
    }

    pub fn replicator_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.replicator_connection_timeout_ms)
    }

    pub fn replicator_total_timeout(&self) -> Duration {
        Duration::from_millis(self.replicator_total_timeout_ms)
    }

    pub fn defective_timeout(&self) -> Duration {
        Duration::from_millis(self.defective_timeout_ms)
    }
}
