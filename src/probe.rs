//! TCP reachability prober.
//!
//! Measures how long it takes to establish a TCP connection to each node's
//! `host:port`. Only the transport is checked: a reachable but misconfigured
//! proxy looks exactly like a healthy one.
//!
//! # Batch lifecycle
//! ```text
//! Prober::start(nodes, token)
//!   → truncates to the attempt budget
//!   → runs at most `concurrency` connects at once
//!   → streams each ProbeResult through one mpsc channel
//!   → stops early when the token is cancelled (in-flight sockets dropped)
//! ```

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfig;
use crate::dedupe::Fingerprint;
use crate::error::ProbeFailure;
use crate::node::Node;

/// Outcome of one connect attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub fingerprint: Fingerprint,
    pub success: bool,
    /// Whole milliseconds from attempt start to established connection.
    pub latency_ms: Option<u64>,
    pub failure: Option<ProbeFailure>,
}

impl ProbeResult {
    fn reachable(fingerprint: Fingerprint, latency: Duration) -> Self {
        Self {
            fingerprint,
            success: true,
            latency_ms: Some(latency.as_millis() as u64),
            failure: None,
        }
    }

    fn failed(fingerprint: Fingerprint, failure: ProbeFailure) -> Self {
        Self {
            fingerprint,
            success: false,
            latency_ms: None,
            failure: Some(failure),
        }
    }
}

/// Aggregate counts for one probe batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub refused: usize,
    pub unresolved: usize,
    pub other_failures: usize,
    /// Targets dropped by the attempt budget.
    pub skipped: usize,
    /// The batch was cancelled before every attempt finished.
    pub cancelled: bool,
}

impl ProbeSummary {
    pub fn record(&mut self, result: &ProbeResult) {
        self.attempted += 1;
        if result.success {
            self.succeeded += 1;
            return;
        }
        self.failed += 1;
        match result.failure {
            Some(ProbeFailure::Timeout) => self.timeouts += 1,
            Some(ProbeFailure::ConnectionRefused) => self.refused += 1,
            Some(ProbeFailure::ResolutionFailure) => self.unresolved += 1,
            Some(ProbeFailure::Other) | None => self.other_failures += 1,
        }
    }
}

/// Collected results of a finished batch.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub results: Vec<ProbeResult>,
    pub summary: ProbeSummary,
}

/// A running batch: results arrive on `results`, `handle` resolves to
/// `true` if the batch was cancelled.
pub struct ProbeRun {
    pub results: mpsc::Receiver<ProbeResult>,
    pub handle: JoinHandle<bool>,
    pub skipped: usize,
}

impl ProbeRun {
    /// Drain every result, then report whether the batch was cancelled.
    pub async fn finish<F>(mut self, mut on_result: F) -> ProbeSummary
    where
        F: FnMut(&ProbeResult),
    {
        let mut summary = ProbeSummary {
            skipped: self.skipped,
            ..ProbeSummary::default()
        };
        while let Some(result) = self.results.recv().await {
            on_result(&result);
            summary.record(&result);
        }
        summary.cancelled = match self.handle.await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                tracing::warn!("probe batch task failed: {e}");
                true
            }
        };
        summary
    }
}

struct Target {
    fingerprint: Fingerprint,
    host: String,
    port: u16,
}

/// Establishes one connection to `host:port`; the prober adds the timeout.
type Connect = Arc<dyn Fn(String, u16) -> BoxFuture<'static, Result<(), ProbeFailure>> + Send + Sync>;

/// Bounded-concurrency TCP prober.
#[derive(Clone)]
pub struct Prober {
    concurrency: usize,
    timeout: Duration,
    max_targets: usize,
    connect: Connect,
}

impl fmt::Debug for Prober {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prober")
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field("max_targets", &self.max_targets)
            .finish_non_exhaustive()
    }
}

impl Prober {
    pub fn new(config: &ProbeConfig) -> Self {
        Self::with_connector(config, |host, port| async move { connect(&host, port).await })
    }

    /// Prober using `connector` in place of a TCP connect.
    pub fn with_connector<F, Fut>(config: &ProbeConfig, connector: F) -> Self
    where
        F: Fn(String, u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProbeFailure>> + Send + 'static,
    {
        Self {
            concurrency: config.concurrency.max(1),
            timeout: config.timeout(),
            max_targets: config.max_targets.max(1),
            connect: Arc::new(move |host, port| Box::pin(connector(host, port))),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe a single node.
    pub async fn check_node(&self, node: &Node) -> ProbeResult {
        let fingerprint = node.fingerprint();
        let attempt = (self.connect)(node.host.clone(), node.port);
        match timed(self.timeout, attempt).await {
            Ok(latency) => ProbeResult::reachable(fingerprint, latency),
            Err(failure) => ProbeResult::failed(fingerprint, failure),
        }
    }

    /// Start probing `nodes` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, nodes: &[Node], token: CancellationToken) -> ProbeRun {
        let skipped = nodes.len().saturating_sub(self.max_targets);
        if skipped > 0 {
            tracing::warn!(
                "probe batch of {} exceeds attempt budget {}, skipping {skipped}",
                nodes.len(),
                self.max_targets
            );
        }
        let targets: Vec<Target> = nodes
            .iter()
            .take(self.max_targets)
            .map(|node| Target {
                fingerprint: node.fingerprint(),
                host: node.host.clone(),
                port: node.port,
            })
            .collect();

        let (tx, rx) = mpsc::channel(self.concurrency);
        let concurrency = self.concurrency;
        let timeout = self.timeout;
        let connect = Arc::clone(&self.connect);

        let handle = tokio::spawn(async move {
            let mut attempts = futures_util::stream::iter(targets)
                .map(move |target| {
                    let attempt = connect(target.host.clone(), target.port);
                    async move {
                        match timed(timeout, attempt).await {
                            Ok(latency) => ProbeResult::reachable(target.fingerprint, latency),
                            Err(failure) => {
                                tracing::debug!(
                                    "probe {}:{} failed: {failure}",
                                    target.host,
                                    target.port
                                );
                                ProbeResult::failed(target.fingerprint, failure)
                            }
                        }
                    }
                })
                .buffer_unordered(concurrency);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!("probe batch cancelled");
                        return true;
                    }
                    next = attempts.next() => match next {
                        Some(result) => {
                            if tx.send(result).await.is_err() {
                                // Receiver gone: nobody wants the rest.
                                return true;
                            }
                        }
                        None => return false,
                    },
                }
            }
        });

        ProbeRun {
            results: rx,
            handle,
            skipped,
        }
    }

    /// Probe `nodes` and collect every result.
    pub async fn probe(&self, nodes: &[Node], token: CancellationToken) -> ProbeReport {
        let mut results = Vec::with_capacity(nodes.len().min(self.max_targets));
        let summary = self
            .start(nodes, token)
            .finish(|result| results.push(result.clone()))
            .await;
        ProbeReport { results, summary }
    }
}

/// Connect to `host:port` within `timeout`, returning the elapsed time.
///
/// The clock starts before name resolution, so DNS time counts as latency.
pub async fn probe_endpoint(host: &str, port: u16, timeout: Duration) -> Result<Duration, ProbeFailure> {
    timed(timeout, connect(host, port)).await
}

/// Run `attempt` within `timeout`, returning the elapsed time.
async fn timed<F>(timeout: Duration, attempt: F) -> Result<Duration, ProbeFailure>
where
    F: Future<Output = Result<(), ProbeFailure>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(failure)) => Err(failure),
        Err(_) => Err(ProbeFailure::Timeout),
    }
}

async fn connect(host: &str, port: u16) -> Result<(), ProbeFailure> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| ProbeFailure::ResolutionFailure)?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeFailure::ResolutionFailure);
    }

    let mut last = ProbeFailure::Other;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            // Dropping the stream closes the socket; only reachability matters.
            Ok(_stream) => return Ok(()),
            Err(e) => last = classify(&e),
        }
    }
    Err(last)
}

fn classify(error: &std::io::Error) -> ProbeFailure {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => ProbeFailure::ConnectionRefused,
        std::io::ErrorKind::TimedOut => ProbeFailure::Timeout,
        _ => ProbeFailure::Other,
    }
}
