//! Engine configuration.
//!
//! Loaded from `~/.nodepool/config.toml` (or an explicit path). A missing file
//! yields defaults; every section and key is optional.
//!
//! ```toml
//! sources = ["https://example.com/sub.txt"]
//!
//! [probe]
//! concurrency = 50
//! timeout_ms = 2500
//! max_targets = 5000
//!
//! [store]
//! capacity = 5000
//!
//! [export]
//! default_limit = 200
//! max_limit = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub probe: ProbeConfig,
    pub store: StoreConfig,
    pub export: ExportConfig,
    /// Source URLs whose bodies yield more share links.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Maximum simultaneous connect attempts.
    pub concurrency: usize,
    /// Per-attempt connect timeout.
    pub timeout_ms: u64,
    /// Attempt budget per batch; larger batches are truncated.
    pub max_targets: usize,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            timeout_ms: 2500,
            max_targets: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: 5000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl ExportConfig {
    /// Requested limit, defaulted and clamped to `max_limit`.
    pub fn resolve_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_limit: 200,
            max_limit: 1000,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
            Ok(())
        }

        positive("probe.concurrency", self.probe.concurrency as u64)?;
        positive("probe.timeout_ms", self.probe.timeout_ms)?;
        positive("probe.max_targets", self.probe.max_targets as u64)?;
        positive("store.capacity", self.store.capacity as u64)?;
        positive("export.default_limit", self.export.default_limit as u64)?;
        positive("export.max_limit", self.export.max_limit as u64)?;

        if self.export.default_limit > self.export.max_limit {
            return Err(ConfigError::Invalid {
                field: "export.default_limit",
                reason: format!(
                    "{} exceeds export.max_limit ({})",
                    self.export.default_limit, self.export.max_limit
                ),
            });
        }
        Ok(())
    }

    /// Load and validate the config at `path`. Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };

        let config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse {:?} as TOML", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config path: `~/.nodepool/config.toml`.
    pub fn default_path() -> PathBuf {
        state_dir().join("config.toml")
    }
}

/// Base directory for nodepool files: `~/.nodepool`.
pub fn state_dir() -> PathBuf {
    let base = directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(".nodepool")
}
