//! Typed errors for the node engine.
//!
//! Only `ConfigError` (and metric registration, which wraps it in
//! `EngineError`) is ever returned to a caller as a hard failure. Parse errors
//! and probe failures are expected steady-state outcomes: they are counted and
//! logged, never propagated past a batch.

use serde::{Deserialize, Serialize};

use crate::node::Protocol;

/// Why a single share link was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown share-link scheme '{scheme}'")]
    UnknownScheme { scheme: String },

    #[error("malformed {protocol} link: {reason}")]
    Malformed { protocol: Protocol, reason: String },
}

impl ParseError {
    pub(crate) fn malformed(protocol: Protocol, reason: impl Into<String>) -> Self {
        Self::Malformed {
            protocol,
            reason: reason.into(),
        }
    }
}

/// Transport-level reason a probe attempt did not connect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error,
)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    #[error("connect timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("host resolution failed")]
    ResolutionFailure,

    #[error("connect failed")]
    Other,
}

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure to construct an [`Engine`](crate::engine::Engine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to register engine metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}
