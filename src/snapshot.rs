//! Node snapshot persistence.
//!
//! Provides async save/load of the node universe to a JSON file on disk,
//! with a saved-at timestamp. Corrupt files are handled gracefully
//! (logged as warning, returns `None`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Document stored on disk: nodes + save timestamp.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub saved_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
}

/// Disk mirror of a store.
pub struct NodeSnapshot;

impl NodeSnapshot {
    /// Save nodes to a JSON file at `path`.
    ///
    /// Creates parent directories if they don't exist.
    pub async fn save(nodes: &[Node], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let file = SnapshotFile {
            saved_at: Utc::now(),
            nodes: nodes.to_vec(),
        };

        let json = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write snapshot {:?}", path))?;
        Ok(())
    }

    /// Load a snapshot from `path`.
    ///
    /// Returns `Ok(None)` if the file doesn't exist or contains corrupt JSON.
    pub async fn load(path: &Path) -> Result<Option<SnapshotFile>> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!("failed to read node snapshot at {}: {e}", path.display());
                return Ok(None);
            }
        };

        match serde_json::from_str::<SnapshotFile>(&data) {
            Ok(file) => Ok(Some(file)),
            Err(e) => {
                tracing::warn!("corrupt node snapshot at {}, ignoring: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Default snapshot path: `~/.nodepool/nodes.json`.
    pub fn default_path() -> PathBuf {
        crate::config::state_dir().join("nodes.json")
    }
}
