//! Normalized node record shared by every stage of the engine.
//!
//! A `Node` is produced by the link parser, keyed by its
//! [`Fingerprint`](crate::dedupe::Fingerprint) in the store, updated by probe
//! results and finally rendered by the exporter.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dedupe::Fingerprint;

/// Share-link protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// UUID-based, TLS-multiplexed (`vless://`).
    Vless,
    /// Base64-encoded JSON document (`vmess://`).
    Vmess,
    /// Password-based TLS (`trojan://`).
    Trojan,
    /// Password/cipher (`ss://`).
    #[serde(rename = "ss")]
    Shadowsocks,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Vless,
        Protocol::Vmess,
        Protocol::Trojan,
        Protocol::Shadowsocks,
    ];

    /// URI scheme without the `://` separator.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Vless => "vless",
            Self::Vmess => "vmess",
            Self::Trojan => "trojan",
            Self::Shadowsocks => "ss",
        }
    }

    /// Look up a protocol by scheme, ignoring ASCII case.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.scheme().eq_ignore_ascii_case(scheme))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shadowsocks" => Ok(Self::Shadowsocks),
            other => Self::from_scheme(other).ok_or_else(|| {
                format!("unknown protocol '{s}' (expected vless, vmess, trojan or ss)")
            }),
        }
    }
}

/// Tri-state reachability of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Never probed.
    #[default]
    Unknown,
    /// Last probe connected within the timeout.
    Healthy,
    /// Last probe failed.
    Unhealthy,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

// ── Params ──────────────────────────────────────────────────────────

/// Insertion-ordered string map of protocol-specific link parameters.
///
/// Re-inserting an existing key replaces its value in place, so the first
/// occurrence decides the position. Serializes as a JSON/TOML map in
/// iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value for `key` if present and non-empty.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = Params;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of string parameters")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Params, A::Error> {
                let mut params = Params::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    params.insert(k, v);
                }
                Ok(params)
            }
        }

        deserializer.deserialize_map(ParamsVisitor)
    }
}

// ── Node ────────────────────────────────────────────────────────────

/// A single proxy endpoint normalized from a share link.
///
/// Serializes every field losslessly, including unknown parameters, so a
/// snapshot can be re-exported without information loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    /// UUID for vless/vmess, password for trojan/ss. Empty when the link had none.
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub parameters: Params,
    /// Source string, trimmed of surrounding whitespace. Empty for nodes built in code.
    #[serde(default)]
    pub original_link: String,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub healthy: Health,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

impl Node {
    /// Build a synthetic (never-ingested) node.
    pub fn new(
        protocol: Protocol,
        host: impl Into<String>,
        port: u16,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            identity: identity.into(),
            label: String::new(),
            parameters: Params::new(),
            original_link: String::new(),
            latency_ms: None,
            healthy: Health::Unknown,
            score: 0.0,
            last_checked: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key, value);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Link to export: the ingested string, or a reconstruction for synthetic nodes.
    ///
    /// `None` when a synthetic node has no valid link form.
    pub fn link(&self) -> Option<String> {
        if !self.original_link.is_empty() {
            return Some(self.original_link.clone());
        }
        match crate::links::to_link(self) {
            Ok(link) => Some(link),
            Err(e) => {
                tracing::debug!("no link for {}: {e}", self.fingerprint());
                None
            }
        }
    }

    /// Transport security mode declared by the link, lowercased.
    pub fn security(&self) -> Option<String> {
        let p = &self.parameters;
        let declared = match self.protocol {
            Protocol::Vmess => p.get_non_empty("tls").or_else(|| p.get_non_empty("security")),
            _ => p.get_non_empty("security"),
        };
        declared.map(str::to_ascii_lowercase)
    }

    /// Whether TLS or REALITY protects the transport.
    ///
    /// Trojan runs over TLS unless the link explicitly says `security=none`.
    pub fn tls_enabled(&self) -> bool {
        match (self.protocol, self.security().as_deref()) {
            (_, Some("tls" | "reality" | "xtls")) => true,
            (Protocol::Trojan, None) => true,
            _ => false,
        }
    }

    pub fn is_reality(&self) -> bool {
        self.security().as_deref() == Some("reality")
    }

    /// Display name, falling back to `host:port`.
    pub fn display_name(&self) -> String {
        if self.label.trim().is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.label.trim().to_string()
        }
    }

    pub fn view(&self) -> NodeView {
        NodeView::from(self)
    }
}

/// JSON-friendly projection of a node for list/read APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub fingerprint: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub label: String,
    pub tls: bool,
    pub healthy: Health,
    pub latency_ms: Option<u64>,
    pub score: f64,
    pub last_checked: Option<DateTime<Utc>>,
    pub link: Option<String>,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        Self {
            fingerprint: node.fingerprint().key(),
            protocol: node.protocol,
            host: node.host.clone(),
            port: node.port,
            label: node.label.clone(),
            tls: node.tls_enabled(),
            healthy: node.healthy,
            latency_ms: node.latency_ms,
            score: node.score,
            last_checked: node.last_checked,
            link: node.link(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_display_and_scheme() {
        assert_eq!(Protocol::Vless.to_string(), "vless");
        assert_eq!(Protocol::Vmess.to_string(), "vmess");
        assert_eq!(Protocol::Trojan.to_string(), "trojan");
        assert_eq!(Protocol::Shadowsocks.to_string(), "ss");
        assert_eq!(Protocol::from_scheme("VLESS"), Some(Protocol::Vless));
        assert_eq!(Protocol::from_scheme("hysteria2"), None);
    }

    #[test]
    fn protocol_from_str_accepts_long_name() {
        assert_eq!("shadowsocks".parse::<Protocol>(), Ok(Protocol::Shadowsocks));
        assert_eq!("Trojan".parse::<Protocol>(), Ok(Protocol::Trojan));
        assert!("wireguard".parse::<Protocol>().is_err());
    }

    #[test]
    fn health_display() {
        assert_eq!(Health::Unknown.to_string(), "unknown");
        assert_eq!(Health::Healthy.to_string(), "healthy");
        assert_eq!(Health::Unhealthy.to_string(), "unhealthy");
        assert_eq!(Health::default(), Health::Unknown);
    }

    #[test]
    fn params_keep_insertion_order_and_replace_in_place() {
        let mut params = Params::new();
        params.insert("security", "tls");
        params.insert("sni", "a.example.com");
        params.insert("type", "ws");
        let prev = params.insert("security", "reality");

        assert_eq!(prev.as_deref(), Some("tls"));
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["security", "sni", "type"]);
        assert_eq!(params.get("security"), Some("reality"));
        assert_eq!(params.remove("sni").as_deref(), Some("a.example.com"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn params_serde_preserves_order() {
        let params: Params = [("zeta", "1"), ("alpha", "2"), ("mid", "3")]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"zeta":"1","alpha":"2","mid":"3"}"#);

        let back: Params = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn node_serde_roundtrip_is_lossless() {
        let mut node = Node::new(Protocol::Vless, "example.com", 443, "id")
            .with_label("Tokyo")
            .with_param("security", "reality")
            .with_param("x-custom", "kept");
        node.original_link = "vless://id@example.com:443".into();
        node.latency_ms = Some(87);
        node.healthy = Health::Healthy;
        node.score = 3.113;
        node.last_checked = Some(Utc::now());

        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn tls_detection_per_protocol() {
        let vless = Node::new(Protocol::Vless, "h", 443, "id").with_param("security", "REALITY");
        assert!(vless.tls_enabled());
        assert!(vless.is_reality());

        let plain = Node::new(Protocol::Vless, "h", 80, "id").with_param("security", "none");
        assert!(!plain.tls_enabled());

        let vmess = Node::new(Protocol::Vmess, "h", 443, "id").with_param("tls", "tls");
        assert!(vmess.tls_enabled());

        let trojan = Node::new(Protocol::Trojan, "h", 443, "pw");
        assert!(trojan.tls_enabled());
        let trojan_plain = trojan.clone().with_param("security", "none");
        assert!(!trojan_plain.tls_enabled());

        let ss = Node::new(Protocol::Shadowsocks, "h", 8388, "pw");
        assert!(!ss.tls_enabled());
    }

    #[test]
    fn display_name_falls_back_to_endpoint() {
        let node = Node::new(Protocol::Trojan, "t.example.com", 443, "pw");
        assert_eq!(node.display_name(), "t.example.com:443");
        assert_eq!(node.with_label("  SG 01 ").display_name(), "SG 01");
    }

    #[test]
    fn link_prefers_original_and_reports_unrenderable() {
        let mut ingested = Node::new(Protocol::Shadowsocks, "s.example.com", 8388, "pw");
        assert_eq!(ingested.link(), None);
        assert_eq!(ingested.view().link, None);

        ingested.original_link = "ss://YWVzLTI1Ni1nY206cHc@s.example.com:8388".into();
        assert_eq!(ingested.link().as_deref(), Some("ss://YWVzLTI1Ni1nY206cHc@s.example.com:8388"));

        let synthetic = Node::new(Protocol::Trojan, "t.example.com", 443, "pw");
        assert_eq!(synthetic.link().as_deref(), Some("trojan://pw@t.example.com:443"));
    }
}
