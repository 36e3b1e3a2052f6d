//! Node ranking.
//!
//! `score` is a pure function of the node's current fields. The store calls it
//! every time a probe result is applied, so stored scores are never stale.

use crate::node::Node;

/// Ports that clients reach most reliably through filtering middleboxes.
pub const PREFERRED_PORTS: [u16; 2] = [443, 8443];

pub const PORT_BONUS: f64 = 1.2;
pub const TLS_BONUS: f64 = 1.0;

/// Latency at or above which the latency bonus reaches zero.
pub const LATENCY_CEILING_MS: u64 = 1000;

/// Rank a node: port bonus + TLS bonus + linear latency bonus.
pub fn score(node: &Node) -> f64 {
    let mut total = 0.0;
    if PREFERRED_PORTS.contains(&node.port) {
        total += PORT_BONUS;
    }
    if node.tls_enabled() {
        total += TLS_BONUS;
    }
    total + latency_bonus(node.latency_ms)
}

/// 1.0 at 0 ms decaying linearly to 0.0 at [`LATENCY_CEILING_MS`]; nothing when absent.
pub fn latency_bonus(latency_ms: Option<u64>) -> f64 {
    match latency_ms {
        Some(ms) => {
            let capped = ms.min(LATENCY_CEILING_MS) as f64;
            (1.0 - capped / LATENCY_CEILING_MS as f64).max(0.0)
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Protocol;

    fn tls_node(latency_ms: Option<u64>) -> Node {
        let mut node = Node::new(Protocol::Vless, "example.com", 443, "id")
            .with_param("security", "tls");
        node.latency_ms = latency_ms;
        node
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn zero_and_ceiling_latency() {
        assert!(approx(score(&tls_node(Some(0))), 3.2));
        assert!(approx(score(&tls_node(Some(1000))), 2.2));
    }

    #[test]
    fn latency_above_ceiling_contributes_nothing() {
        assert_eq!(latency_bonus(Some(1000)), 0.0);
        assert_eq!(latency_bonus(Some(5000)), 0.0);
        assert_eq!(latency_bonus(Some(u64::MAX)), 0.0);
        assert!(approx(score(&tls_node(Some(30_000))), 2.2));
    }

    #[test]
    fn missing_latency_gets_no_bonus() {
        assert_eq!(latency_bonus(None), 0.0);
        assert!(approx(score(&tls_node(None)), 2.2));
    }

    #[test]
    fn linear_decay() {
        assert!(approx(latency_bonus(Some(250)), 0.75));
        assert!(approx(latency_bonus(Some(500)), 0.5));
    }

    #[test]
    fn lower_latency_never_scores_lower() {
        let mut previous = f64::INFINITY;
        for ms in (0..=1200).step_by(10) {
            let current = score(&tls_node(Some(ms)));
            assert!(current <= previous, "score rose at {ms}ms");
            previous = current;
        }
    }

    #[test]
    fn port_and_tls_bonuses() {
        let plain = Node::new(Protocol::Shadowsocks, "h", 8388, "pw");
        assert_eq!(score(&plain), 0.0);

        let alt_port = Node::new(Protocol::Shadowsocks, "h", 8443, "pw");
        assert!(approx(score(&alt_port), 1.2));

        let reality = Node::new(Protocol::Vless, "h", 2053, "id").with_param("security", "reality");
        assert!(approx(score(&reality), 1.0));
    }
}
