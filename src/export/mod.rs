//! Node export in subscription formats.
//!
//! Nodes are filtered, ranked (score descending, then host, then port) and
//! truncated to the limit before rendering, so every format sees the same
//! ordered subset.

pub mod clash;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::node::{Health, Node, Protocol};

pub use clash::{generate_clash_config, ClashDocument, SELECTOR_GROUP_NAME};

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One share link per line.
    Raw,
    /// The raw list, base64-encoded as one blob.
    Base64,
    /// Clash client configuration (YAML).
    Clash,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Raw | Self::Base64 => "text/plain; charset=utf-8",
            Self::Clash => "text/yaml; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Base64 => write!(f, "base64"),
            Self::Clash => write!(f, "clash"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "links" | "txt" => Ok(Self::Raw),
            "base64" | "sub" | "subscription" => Ok(Self::Base64),
            "clash" | "yaml" => Ok(Self::Clash),
            other => Err(format!(
                "unknown export format '{other}' (expected raw, base64 or clash)"
            )),
        }
    }
}

/// Which nodes an export or listing includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFilter {
    pub protocol: Option<Protocol>,
    /// Only nodes whose last probe succeeded.
    pub healthy_only: bool,
}

impl NodeFilter {
    pub fn protocol(protocol: Protocol) -> Self {
        Self {
            protocol: Some(protocol),
            ..Self::default()
        }
    }

    pub fn healthy() -> Self {
        Self {
            healthy_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        if let Some(protocol) = self.protocol {
            if node.protocol != protocol {
                return false;
            }
        }
        !self.healthy_only || node.healthy == Health::Healthy
    }
}

/// Rendered export plus accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportPayload {
    pub format: ExportFormat,
    pub body: String,
    /// Nodes rendered into `body`.
    pub exported: usize,
    /// Nodes selected but left out because the format cannot express them.
    pub omitted: usize,
}

/// Rank order: score descending, then host and port ascending.
pub fn rank_order(a: &Node, b: &Node) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.host.cmp(&b.host))
        .then_with(|| a.port.cmp(&b.port))
}

/// Filter, rank and truncate.
pub fn select(nodes: Vec<Node>, filter: &NodeFilter, limit: usize) -> Vec<Node> {
    let mut selected: Vec<Node> = nodes.into_iter().filter(|n| filter.matches(n)).collect();
    selected.sort_by(rank_order);
    selected.truncate(limit);
    selected
}

/// Render already-selected nodes.
pub fn render(format: ExportFormat, nodes: &[Node]) -> ExportPayload {
    match format {
        ExportFormat::Raw | ExportFormat::Base64 => {
            let (links, omitted) = link_list(nodes);
            if omitted > 0 {
                tracing::info!("{format} export omitted {omitted} node(s) without a valid link form");
            }
            let exported = links.len();
            let body = links.join("\n");
            ExportPayload {
                format,
                body: match format {
                    ExportFormat::Base64 => STANDARD.encode(body),
                    _ => body,
                },
                exported,
                omitted,
            }
        }
        ExportFormat::Clash => {
            let doc = generate_clash_config(nodes);
            if doc.omitted > 0 {
                tracing::info!(
                    "clash export omitted {} node(s) without a structured mapping",
                    doc.omitted
                );
            }
            ExportPayload {
                format,
                body: doc.yaml,
                exported: doc.exported,
                omitted: doc.omitted,
            }
        }
    }
}

/// Filter, rank, truncate and render.
pub fn export(nodes: Vec<Node>, format: ExportFormat, filter: &NodeFilter, limit: usize) -> ExportPayload {
    render(format, &select(nodes, filter, limit))
}

/// Links of `nodes` in order, plus how many had none.
fn link_list(nodes: &[Node]) -> (Vec<String>, usize) {
    let links: Vec<String> = nodes.iter().filter_map(Node::link).collect();
    let omitted = nodes.len() - links.len();
    (links, omitted)
}
