//! Prometheus metrics for one engine instance.
//!
//! Each [`Engine`](crate::engine::Engine) owns its own registry, so several
//! engines in one process never share counters.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct EngineMetrics {
    registry: Registry,
    pub links_accepted: IntCounter,
    pub links_rejected: IntCounter,
    pub probe_success: IntCounter,
    pub probe_failure: IntCounter,
    pub evictions: IntCounter,
    pub export_omitted: IntCounter,
    pub store_nodes: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let links_accepted = counter(
            "nodepool_links_accepted_total",
            "Share links parsed successfully",
        )?;
        let links_rejected = counter(
            "nodepool_links_rejected_total",
            "Share links rejected by the parser",
        )?;
        let probe_success = counter(
            "nodepool_probe_success_total",
            "Probe attempts that established a TCP connection",
        )?;
        let probe_failure = counter(
            "nodepool_probe_failure_total",
            "Probe attempts that failed to connect",
        )?;
        let evictions = counter(
            "nodepool_evictions_total",
            "Nodes evicted because the store was at capacity",
        )?;
        let export_omitted = counter(
            "nodepool_export_omitted_total",
            "Nodes left out of an export the format cannot express",
        )?;

        let store_nodes = IntGauge::new("nodepool_store_nodes", "Nodes currently held in the store")?;
        registry.register(Box::new(store_nodes.clone()))?;

        Ok(Self {
            registry,
            links_accepted,
            links_rejected,
            probe_success,
            probe_failure,
            evictions,
            export_omitted,
            store_nodes,
        })
    }

    /// Text exposition format of every registered metric.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
