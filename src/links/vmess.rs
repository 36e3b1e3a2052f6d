//! `vmess://<base64 JSON>`
//!
//! The payload is a flat JSON object in the v2rayN layout: `add` and `port`
//! are required, `id` is the UUID, `ps` the label. Every other key becomes a
//! parameter, stringified.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use super::decode_base64_lenient;
use crate::error::ParseError;
use crate::node::{Node, Params, Protocol};

/// Keys mapped onto dedicated node fields instead of parameters.
const FIELD_KEYS: &[&str] = &["add", "port", "id", "ps"];

pub(super) fn parse(rest: &str) -> Result<Node, ParseError> {
    let payload = rest.split('#').next().unwrap_or_default().trim();
    let decoded = decode_base64_lenient(payload)
        .ok_or_else(|| ParseError::malformed(Protocol::Vmess, "payload is not base64"))?;
    let doc: Map<String, Value> = serde_json::from_slice(&decoded)
        .map_err(|e| ParseError::malformed(Protocol::Vmess, format!("payload is not a JSON object: {e}")))?;

    let host = doc
        .get("add")
        .map(scalar_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::malformed(Protocol::Vmess, "missing 'add'"))?;
    let port = doc
        .get("port")
        .map(scalar_to_string)
        .ok_or_else(|| ParseError::malformed(Protocol::Vmess, "missing 'port'"))?;
    let port = super::parse_port(Protocol::Vmess, &port)?;

    let identity = doc.get("id").map(scalar_to_string).unwrap_or_default();
    let label = doc.get("ps").map(scalar_to_string).unwrap_or_default();

    let parameters: Params = doc
        .iter()
        .filter(|(k, v)| !FIELD_KEYS.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), scalar_to_string(v)))
        .collect();

    let mut node = Node::new(Protocol::Vmess, host, port, identity.trim());
    node.label = label;
    node.parameters = parameters;
    Ok(node)
}

pub(super) fn render(node: &Node) -> String {
    let mut doc = Map::new();
    doc.insert("v".into(), Value::String("2".into()));
    for (k, v) in node.parameters.iter() {
        doc.insert(k.to_string(), Value::String(v.to_string()));
    }
    doc.insert("ps".into(), Value::String(node.label.clone()));
    doc.insert("add".into(), Value::String(node.host.clone()));
    doc.insert("port".into(), Value::String(node.port.to_string()));
    doc.insert("id".into(), Value::String(node.identity.clone()));

    let json = Value::Object(doc).to_string();
    format!("vmess://{}", STANDARD.encode(json))
}

/// Render a JSON value as a parameter string; nested values stay compact JSON.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn encode(json: &str) -> String {
        STANDARD.encode(json)
    }

    #[test]
    fn parses_string_and_numeric_ports() {
        let text = encode(r#"{"add":"vm.example.com","port":"443","id":"abc","ps":"JP"}"#);
        let node = parse(&text).unwrap();
        assert_eq!(node.host, "vm.example.com");
        assert_eq!(node.port, 443);
        assert_eq!(node.identity, "abc");
        assert_eq!(node.label, "JP");

        let numeric = encode(r#"{"add":"vm.example.com","port":8443,"id":"abc"}"#);
        assert_eq!(parse(&numeric).unwrap().port, 8443);
    }

    #[test]
    fn accepts_url_safe_unpadded_payload() {
        let json = r#"{"add":"vm.example.com","port":443,"id":"abc","path":"/??>"}"#;
        let node = parse(&URL_SAFE_NO_PAD.encode(json)).unwrap();
        assert_eq!(node.parameters.get("path"), Some("/??>"));
    }

    #[test]
    fn other_keys_become_string_params() {
        let text = encode(r#"{"v":2,"add":"h","port":443,"id":"abc","aid":0,"net":"ws","tls":"tls","extra":{"a":1},"nothing":null}"#);
        let node = parse(&text).unwrap();
        assert_eq!(node.parameters.get("v"), Some("2"));
        assert_eq!(node.parameters.get("aid"), Some("0"));
        assert_eq!(node.parameters.get("net"), Some("ws"));
        assert_eq!(node.parameters.get("extra"), Some(r#"{"a":1}"#));
        assert!(!node.parameters.contains_key("nothing"));
        assert!(!node.parameters.contains_key("add"));
    }

    #[test]
    fn missing_required_keys_are_malformed() {
        assert!(parse(&encode(r#"{"port":443,"id":"abc"}"#)).is_err());
        assert!(parse(&encode(r#"{"add":"h","id":"abc"}"#)).is_err());
        assert!(parse(&encode(r#"{"add":"","port":443}"#)).is_err());
        assert!(parse(&encode(r#"{"add":"h","port":"http"}"#)).is_err());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        assert!(parse("%%%").is_err());
        assert!(parse(&encode("[1,2,3]")).is_err());
        assert!(parse(&encode("not json")).is_err());
    }

    #[test]
    fn missing_id_is_kept_empty() {
        let node = parse(&encode(r#"{"add":"h","port":443}"#)).unwrap();
        assert_eq!(node.identity, "");
    }

    #[test]
    fn render_roundtrips_fields() {
        let node = Node::new(Protocol::Vmess, "vm.example.com", 443, "abc")
            .with_label("JP")
            .with_param("net", "ws")
            .with_param("tls", "tls");
        let link = render(&node);
        let back = parse(link.strip_prefix("vmess://").unwrap()).unwrap();
        assert_eq!(back.host, "vm.example.com");
        assert_eq!(back.port, 443);
        assert_eq!(back.identity, "abc");
        assert_eq!(back.label, "JP");
        assert_eq!(back.parameters.get("net"), Some("ws"));
        assert_eq!(back.parameters.get("tls"), Some("tls"));
    }
}
