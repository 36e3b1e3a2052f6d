//! Proxy share-link aggregation and health scoring.
//!
//! Ingests vless, vmess, trojan and shadowsocks share links, deduplicates them
//! by identity, measures TCP reachability, scores each node and re-exports the
//! best ones as a link list, a base64 subscription or a Clash configuration.

pub mod config;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod export;
pub mod links;
pub mod metrics;
pub mod node;
pub mod probe;
pub mod score;
pub mod snapshot;
pub mod sources;
pub mod store;

pub use config::EngineConfig;
pub use dedupe::Fingerprint;
pub use engine::{Engine, IngestReport, PingResult, ProbeScope, RefreshReport, SortOrder};
pub use error::{ConfigError, EngineError, ParseError, ProbeFailure};
pub use export::{ExportFormat, ExportPayload, NodeFilter};
pub use node::{Health, Node, NodeView, Params, Protocol};
pub use probe::{ProbeResult, ProbeSummary, Prober};
pub use snapshot::NodeSnapshot;
pub use sources::SourceFetcher;
