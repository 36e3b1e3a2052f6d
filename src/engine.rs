//! The node engine: parse → dedupe → store → probe → score → export.
//!
//! An [`Engine`] owns its store, prober and metrics; there is no global state,
//! so several engines can live in one process. Every method takes `&self` and
//! is safe to call concurrently: the store serializes its own mutation, and
//! exports work on a snapshot so they never wait on a running probe batch.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dedupe::{self, Fingerprint};
use crate::error::EngineError;
use crate::export::{self, ExportFormat, ExportPayload, NodeFilter};
use crate::links;
use crate::metrics::EngineMetrics;
use crate::node::{Health, Node, NodeView, Protocol};
use crate::probe::{ProbeResult, ProbeSummary, Prober};
use crate::sources::{self, SourceBatch, SourceFetcher};
use crate::store::{self, NodeStore, UpsertOutcome};

/// Default interval of the background refresh loop.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Accounting for one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Links that parsed, duplicates included.
    pub accepted: usize,
    /// Links the parser rejected.
    pub rejected: usize,
    /// Accepted links repeating an earlier fingerprint in the same batch.
    pub duplicates: usize,
    /// Fingerprints new to the store.
    pub inserted: usize,
    /// Fingerprints already stored; cosmetic fields refreshed.
    pub updated: usize,
    /// Stored nodes evicted to make room.
    pub evicted: usize,
}

/// Which stored nodes a probe batch covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeScope {
    #[default]
    All,
    Protocol(Protocol),
}

impl ProbeScope {
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Self::All => true,
            Self::Protocol(protocol) => node.protocol == *protocol,
        }
    }
}

impl From<Option<Protocol>> for ProbeScope {
    fn from(protocol: Option<Protocol>) -> Self {
        protocol.map_or(Self::All, Self::Protocol)
    }
}

/// Ordering of [`Engine::list`] results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Score descending (export order).
    #[default]
    Score,
    /// Lowest latency first; unmeasured nodes last.
    Latency,
    /// Most recently checked first; never-checked nodes last.
    Recent,
    /// Host, then port, ascending.
    Host,
}

impl SortOrder {
    fn compare(self, a: &Node, b: &Node) -> Ordering {
        match self {
            Self::Score => export::rank_order(a, b),
            Self::Latency => match (a.latency_ms, b.latency_ms) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| export::rank_order(a, b)),
            Self::Recent => b
                .last_checked
                .cmp(&a.last_checked)
                .then_with(|| export::rank_order(a, b)),
            Self::Host => a
                .host
                .cmp(&b.host)
                .then_with(|| a.port.cmp(&b.port))
                .then_with(|| a.protocol.cmp(&b.protocol)),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Score => write!(f, "score"),
            Self::Latency => write!(f, "latency"),
            Self::Recent => write!(f, "recent"),
            Self::Host => write!(f, "host"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "score" => Ok(Self::Score),
            "latency" => Ok(Self::Latency),
            "recent" | "checked" => Ok(Self::Recent),
            "host" => Ok(Self::Host),
            other => Err(format!(
                "unknown sort order '{other}' (expected score, latency, recent or host)"
            )),
        }
    }
}

/// Outcome of an ad hoc probe of one caller-supplied link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResult {
    /// The parsed node with the probe outcome applied.
    pub node: NodeView,
    pub result: ProbeResult,
}

/// Outcome of [`Engine::refresh`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub sources_fetched: usize,
    pub sources_failed: usize,
    pub ingest: IngestReport,
    pub probe: ProbeSummary,
}

pub struct Engine {
    config: EngineConfig,
    store: NodeStore,
    prober: Prober,
    metrics: EngineMetrics,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let metrics = EngineMetrics::new()?;
        Ok(Self {
            store: NodeStore::new(config.store.capacity),
            prober: Prober::new(&config.probe),
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // ── Ingestion ───────────────────────────────────────────────────

    /// Parse, dedupe and upsert raw links. Blank and comment lines are skipped.
    pub fn ingest<I, S>(&self, raws: I) -> IngestReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let batch = links::parse_batch(raws);
        let accepted = batch.nodes.len();
        let unique = dedupe::dedupe(batch.nodes);

        let mut report = IngestReport {
            accepted,
            rejected: batch.rejected,
            duplicates: accepted - unique.len(),
            ..IngestReport::default()
        };
        for node in unique {
            match self.store.upsert(node) {
                UpsertOutcome::Inserted { evicted } => {
                    report.inserted += 1;
                    if evicted.is_some() {
                        report.evicted += 1;
                    }
                }
                UpsertOutcome::Updated => report.updated += 1,
            }
        }

        self.metrics.links_accepted.inc_by(report.accepted as u64);
        self.metrics.links_rejected.inc_by(report.rejected as u64);
        self.metrics.evictions.inc_by(report.evicted as u64);
        self.sync_store_gauge();

        tracing::info!(
            "ingested {} link(s): {} new, {} updated, {} duplicate, {} rejected, {} evicted",
            report.accepted,
            report.inserted,
            report.updated,
            report.duplicates,
            report.rejected,
            report.evicted
        );
        report
    }

    /// Ingest a source body: a link list or a base64 subscription blob.
    pub fn ingest_body(&self, body: &str) -> IngestReport {
        self.ingest(sources::decode_body(body))
    }

    // ── Probing ─────────────────────────────────────────────────────

    /// Probe stored nodes in `scope` and apply the results.
    ///
    /// With `healthcheck` every node in scope is probed; without it only
    /// nodes never probed so far. Cancelling `cancel` stops the batch; results
    /// already received are kept.
    pub async fn probe(
        &self,
        scope: ProbeScope,
        healthcheck: bool,
        cancel: CancellationToken,
    ) -> ProbeSummary {
        let targets: Vec<Node> = self
            .store
            .all()
            .into_iter()
            .filter(|node| scope.matches(node))
            .filter(|node| healthcheck || node.healthy == Health::Unknown)
            .collect();
        if targets.is_empty() {
            tracing::debug!("no nodes to probe");
            return ProbeSummary::default();
        }

        let summary = self
            .prober
            .start(&targets, cancel)
            .finish(|result| {
                self.store.apply(result, Utc::now());
                if result.success {
                    self.metrics.probe_success.inc();
                } else {
                    self.metrics.probe_failure.inc();
                }
            })
            .await;

        tracing::info!(
            "probed {} node(s): {} reachable, {} failed ({} timeout, {} refused, {} unresolved){}",
            summary.attempted,
            summary.succeeded,
            summary.failed,
            summary.timeouts,
            summary.refused,
            summary.unresolved,
            if summary.cancelled { ", cancelled" } else { "" }
        );
        summary
    }

    /// Probe caller-supplied links without touching the store.
    ///
    /// Results follow input order; links that were cancelled or exceeded the
    /// attempt budget are absent.
    pub async fn ping<I, S>(&self, raws: I, cancel: CancellationToken) -> Vec<PingResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nodes = dedupe::dedupe(links::parse_batch(raws).nodes);
        let report = self.prober.probe(&nodes, cancel).await;

        let mut by_fingerprint: HashMap<Fingerprint, ProbeResult> = report
            .results
            .into_iter()
            .map(|result| (result.fingerprint.clone(), result))
            .collect();
        let checked_at = Utc::now();

        nodes
            .into_iter()
            .filter_map(|mut node| {
                let result = by_fingerprint.remove(&node.fingerprint())?;
                store::record_probe(&mut node, &result, checked_at);
                Some(PingResult {
                    node: node.view(),
                    result,
                })
            })
            .collect()
    }

    /// Fetch every configured source, ingest the links, then probe nodes
    /// not yet checked.
    pub async fn refresh(&self, fetcher: &SourceFetcher, cancel: CancellationToken) -> RefreshReport {
        let SourceBatch {
            links,
            fetched,
            failed,
        } = fetcher.fetch_all(&self.config.sources).await;
        let ingest = self.ingest(&links);
        let probe = self.probe(ProbeScope::All, false, cancel).await;
        RefreshReport {
            sources_fetched: fetched,
            sources_failed: failed,
            ingest,
            probe,
        }
    }

    /// Spawn a background loop re-probing every stored node each `interval`.
    ///
    /// Cancelling `token` stops the loop and any batch in flight.
    pub fn spawn_refresh_loop(
        self: Arc<Self>,
        interval: Option<Duration>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = interval.unwrap_or(DEFAULT_REFRESH_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("refresh loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.probe(ProbeScope::All, true, token.child_token()).await;
                    }
                }
            }
        })
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Filtered, sorted node views. `limit` is defaulted and clamped like exports.
    pub fn list(&self, filter: &NodeFilter, sort: SortOrder, limit: Option<usize>) -> Vec<NodeView> {
        let limit = self.config.export.resolve_limit(limit);
        let mut nodes: Vec<Node> = self
            .store
            .all()
            .into_iter()
            .filter(|node| filter.matches(node))
            .collect();
        nodes.sort_by(|a, b| sort.compare(a, b));
        nodes.iter().take(limit).map(Node::view).collect()
    }

    /// Look up a node by its fingerprint key.
    pub fn get(&self, key: &str) -> Option<NodeView> {
        self.store.get_by_key(key).map(|node| node.view())
    }

    /// Render the best `limit` matching nodes.
    pub fn export(&self, format: ExportFormat, filter: &NodeFilter, limit: Option<usize>) -> ExportPayload {
        let limit = self.config.export.resolve_limit(limit);
        let payload = export::export(self.store.all(), format, filter, limit);
        self.metrics.export_omitted.inc_by(payload.omitted as u64);
        payload
    }

    // ── Persistence mirror ──────────────────────────────────────────

    /// Every stored node, measurements included.
    pub fn snapshot(&self) -> Vec<Node> {
        self.store.all()
    }

    /// Load previously snapshotted nodes, keeping their measurements.
    /// Returns how many were new to the store.
    pub fn restore(&self, nodes: Vec<Node>) -> usize {
        let mut inserted = 0;
        for node in nodes {
            if let UpsertOutcome::Inserted { evicted } = self.store.upsert(node) {
                inserted += 1;
                if evicted.is_some() {
                    self.metrics.evictions.inc();
                }
            }
        }
        self.sync_store_gauge();
        tracing::debug!("restored {inserted} node(s) from snapshot");
        inserted
    }

    fn sync_store_gauge(&self) {
        self.metrics.store_nodes.set(self.store.len() as i64);
    }
}
