//! Node identity and first-seen-wins deduplication.
//!
//! Two nodes are the same entity iff they share `(protocol, host, port,
//! identity)`. Labels and transport parameters are cosmetic: changing them
//! must never create a second entry.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::node::{Node, Protocol};

/// Identity tuple of a node.
///
/// Hostnames compare case-insensitively, so the host is stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub identity: String,
}

impl Fingerprint {
    pub fn of(node: &Node) -> Self {
        Self {
            protocol: node.protocol,
            host: node.host.to_ascii_lowercase(),
            port: node.port,
            identity: node.identity.clone(),
        }
    }

    /// Stable hex SHA-256 key, identical across processes and releases.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.protocol.scheme().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.host.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.port.to_be_bytes());
        hasher.update([0u8]);
        hasher.update(self.identity.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Drop later duplicates, keeping the first occurrence and input order.
pub fn dedupe(nodes: Vec<Node>) -> Vec<Node> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes
        .into_iter()
        .filter(|node| seen.insert(node.fingerprint()))
        .collect()
}

/// Refresh the cosmetic fields of `existing` from a re-ingested copy.
///
/// Health, latency, score and last-checked time are measurement results and
/// stay untouched.
pub fn merge_cosmetic(existing: &mut Node, incoming: Node) {
    existing.label = incoming.label;
    existing.parameters = incoming.parameters;
    existing.original_link = incoming.original_link;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Health;

    fn vless(host: &str, label: &str) -> Node {
        Node::new(
            Protocol::Vless,
            host,
            443,
            "11111111-2222-3333-4444-555555555555",
        )
        .with_label(label)
    }

    #[test]
    fn fingerprint_ignores_label_and_params() {
        let a = vless("example.com", "A").with_param("sni", "one");
        let b = vless("example.com", "B").with_param("sni", "two");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().key(), b.fingerprint().key());
    }

    #[test]
    fn fingerprint_host_is_case_insensitive() {
        assert_eq!(
            vless("Example.COM", "").fingerprint(),
            vless("example.com", "").fingerprint()
        );
    }

    #[test]
    fn fingerprint_differs_on_identity_fields() {
        let base = vless("example.com", "");
        let mut other_port = base.clone();
        other_port.port = 8443;
        let mut other_id = base.clone();
        other_id.identity = "aaaaaaaa-2222-3333-4444-555555555555".into();
        let mut other_proto = base.clone();
        other_proto.protocol = Protocol::Vmess;

        let key = base.fingerprint().key();
        assert_ne!(key, other_port.fingerprint().key());
        assert_ne!(key, other_id.fingerprint().key());
        assert_ne!(key, other_proto.fingerprint().key());
    }

    #[test]
    fn fingerprint_key_is_stable_hex() {
        let key = vless("example.com", "").fingerprint().key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, vless("example.com", "x").fingerprint().key());
    }

    #[test]
    fn dedupe_keeps_first_seen_label() {
        let nodes = vec![
            vless("example.com", "first"),
            vless("other.com", "other"),
            vless("example.com", "second"),
        ];
        let unique = dedupe(nodes);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].label, "first");
        assert_eq!(unique[1].label, "other");
    }

    #[test]
    fn merge_cosmetic_keeps_measurements() {
        let mut existing = vless("example.com", "old");
        existing.healthy = Health::Healthy;
        existing.latency_ms = Some(42);
        existing.score = 3.158;

        let incoming = vless("example.com", "new").with_param("sni", "cdn.example.com");
        merge_cosmetic(&mut existing, incoming);

        assert_eq!(existing.label, "new");
        assert_eq!(existing.parameters.get("sni"), Some("cdn.example.com"));
        assert_eq!(existing.healthy, Health::Healthy);
        assert_eq!(existing.latency_ms, Some(42));
        assert_eq!(existing.score, 3.158);
    }
}
