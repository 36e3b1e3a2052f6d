//! Clash client configuration export.
//!
//! Produces a self-contained Clash (Meta) YAML document:
//! - global settings bound to localhost
//! - `proxies` with one entry per mappable node, transport and TLS/REALITY
//!   options derived from the node's parameters
//! - `proxy-groups` with a single `select` group containing all proxies
//! - `rules` routing all traffic through the selector group
//!
//! Nodes whose transport Clash cannot express are left out and counted.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::node::{Node, Params, Protocol};

/// Name of the proxy selector group in generated Clash config.
pub const SELECTOR_GROUP_NAME: &str = "nodepool-select";

/// Default local mixed (HTTP+SOCKS) port in generated configs.
const MIXED_PORT: u16 = 7890;

/// Transports with a Clash mapping, after normalization.
const SUPPORTED_NETWORKS: &[&str] = &["tcp", "ws", "grpc", "h2", "http"];

/// Generated document plus accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClashDocument {
    pub yaml: String,
    pub exported: usize,
    pub omitted: usize,
}

/// YAML value subset needed for proxy entries.
#[derive(Debug, Clone, PartialEq)]
enum Yaml {
    Str(String),
    Num(u64),
    Bool(bool),
    List(Vec<String>),
    Map(Vec<(&'static str, Yaml)>),
}

type Fields = Vec<(&'static str, Yaml)>;

/// Generate a Clash config YAML string from `nodes`, in the given order.
pub fn generate_clash_config(nodes: &[Node]) -> ClashDocument {
    let mut names = Vec::with_capacity(nodes.len());
    let mut used = HashSet::new();
    let mut proxies = String::with_capacity(nodes.len() * 256);
    let mut omitted = 0;

    for node in nodes {
        let fields = match proxy_fields(node) {
            Ok(fields) => fields,
            Err(reason) => {
                tracing::debug!("omitting {} from clash export: {reason}", node.fingerprint());
                omitted += 1;
                continue;
            }
        };
        let name = unique_name(&node.display_name(), &mut used);
        proxies.push_str(&format!("  - name: \"{}\"\n", escape_yaml_string(&name)));
        for (key, value) in &fields {
            write_field(&mut proxies, 4, key, value);
        }
        names.push(name);
    }

    let mut yaml = String::with_capacity(proxies.len() + 512);

    // Global settings; always bind to localhost.
    yaml.push_str(&format!(
        "mixed-port: {MIXED_PORT}\n\
         bind-address: 127.0.0.1\n\
         allow-lan: false\n\
         mode: rule\n\
         log-level: info\n\n"
    ));

    if names.is_empty() {
        yaml.push_str("proxies: []\n");
    } else {
        yaml.push_str("proxies:\n");
        yaml.push_str(&proxies);
    }

    // Single selector group containing every node name.
    yaml.push_str("\nproxy-groups:\n");
    yaml.push_str(&format!("  - name: \"{}\"\n", SELECTOR_GROUP_NAME));
    yaml.push_str("    type: select\n");
    yaml.push_str("    proxies:\n");
    if names.is_empty() {
        yaml.push_str("      - DIRECT\n");
    }
    for name in &names {
        yaml.push_str(&format!("      - \"{}\"\n", escape_yaml_string(name)));
    }

    // Route everything through the selector.
    yaml.push_str("\nrules:\n");
    yaml.push_str(&format!("  - MATCH,{}\n", SELECTOR_GROUP_NAME));

    ClashDocument {
        yaml,
        exported: names.len(),
        omitted,
    }
}

// ── Per-protocol mapping ────────────────────────────────────────────

fn proxy_fields(node: &Node) -> Result<Fields, String> {
    let mut fields: Fields = vec![
        ("type", Yaml::Str(node.protocol.to_string())),
        ("server", Yaml::Str(node.host.clone())),
        ("port", Yaml::Num(u64::from(node.port))),
    ];
    match node.protocol {
        Protocol::Vless => vless_fields(node, &mut fields)?,
        Protocol::Vmess => vmess_fields(node, &mut fields)?,
        Protocol::Trojan => trojan_fields(node, &mut fields)?,
        Protocol::Shadowsocks => shadowsocks_fields(node, &mut fields)?,
    }
    Ok(fields)
}

fn vless_fields(node: &Node, fields: &mut Fields) -> Result<(), String> {
    let p = &node.parameters;
    fields.push(("uuid", Yaml::Str(node.identity.clone())));
    fields.push(("udp", Yaml::Bool(true)));
    if let Some(flow) = p.get_non_empty("flow") {
        fields.push(("flow", Yaml::Str(flow.to_string())));
    }
    transport_fields(p, &network(p, "type")?, fields);

    if node.tls_enabled() {
        fields.push(("tls", Yaml::Bool(true)));
        tls_fields(p, fields);
        if node.is_reality() {
            let public_key = p
                .get_non_empty("pbk")
                .ok_or("reality link without public key (pbk)")?;
            let mut opts = vec![("public-key", Yaml::Str(public_key.to_string()))];
            if let Some(sid) = p.get("sid") {
                opts.push(("short-id", Yaml::Str(sid.to_string())));
            }
            fields.push(("reality-opts", Yaml::Map(opts)));
        }
    }
    Ok(())
}

fn vmess_fields(node: &Node, fields: &mut Fields) -> Result<(), String> {
    let p = &node.parameters;
    let alter_id = p
        .get_non_empty("aid")
        .and_then(|aid| aid.trim().parse::<u64>().ok())
        .unwrap_or(0);
    fields.push(("uuid", Yaml::Str(node.identity.clone())));
    fields.push(("alterId", Yaml::Num(alter_id)));
    fields.push((
        "cipher",
        Yaml::Str(p.get_non_empty("scy").unwrap_or("auto").to_string()),
    ));
    fields.push(("udp", Yaml::Bool(true)));

    let mut network = network(p, "net")?;
    // tcp with an HTTP header type is Clash's `http` network.
    if network == "tcp" && p.get("type") == Some("http") {
        network = "http".into();
    }
    transport_fields(p, &network, fields);

    if node.tls_enabled() {
        fields.push(("tls", Yaml::Bool(true)));
        if let Some(sni) = p.get_non_empty("sni").or_else(|| p.get_non_empty("host")) {
            fields.push(("servername", Yaml::Str(sni.to_string())));
        }
        if let Some(alpn) = alpn_list(p) {
            fields.push(("alpn", Yaml::List(alpn)));
        }
        if insecure(p) {
            fields.push(("skip-cert-verify", Yaml::Bool(true)));
        }
    }
    Ok(())
}

fn trojan_fields(node: &Node, fields: &mut Fields) -> Result<(), String> {
    if !node.tls_enabled() {
        return Err("trojan without TLS".into());
    }
    let p = &node.parameters;
    fields.push(("password", Yaml::Str(node.identity.clone())));
    fields.push(("udp", Yaml::Bool(true)));
    if let Some(sni) = p.get_non_empty("sni").or_else(|| p.get_non_empty("peer")) {
        fields.push(("sni", Yaml::Str(sni.to_string())));
    }
    if let Some(alpn) = alpn_list(p) {
        fields.push(("alpn", Yaml::List(alpn)));
    }
    if let Some(fp) = p.get_non_empty("fp") {
        fields.push(("client-fingerprint", Yaml::Str(fp.to_string())));
    }
    if insecure(p) {
        fields.push(("skip-cert-verify", Yaml::Bool(true)));
    }
    let network = network(p, "type")?;
    if network != "tcp" {
        transport_fields(p, &network, fields);
    }
    Ok(())
}

fn shadowsocks_fields(node: &Node, fields: &mut Fields) -> Result<(), String> {
    let p = &node.parameters;
    let method = p
        .get_non_empty("method")
        .ok_or("shadowsocks link without cipher method")?;
    fields.push(("cipher", Yaml::Str(method.to_string())));
    fields.push(("password", Yaml::Str(node.identity.clone())));
    fields.push(("udp", Yaml::Bool(true)));

    let Some(plugin) = p.get_non_empty("plugin") else {
        return Ok(());
    };
    let mut parts = plugin.split(';');
    let name = parts.next().unwrap_or_default().trim();
    let opts: Vec<(&str, &str)> = parts
        .map(|opt| opt.split_once('=').unwrap_or((opt, "")))
        .collect();
    let opt = |key: &str| opts.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string());

    match name {
        "obfs-local" | "simple-obfs" | "obfs" => {
            let mut plugin_opts = vec![(
                "mode",
                Yaml::Str(opt("obfs").unwrap_or_else(|| "http".into())),
            )];
            if let Some(host) = opt("obfs-host") {
                plugin_opts.push(("host", Yaml::Str(host)));
            }
            fields.push(("plugin", Yaml::Str("obfs".into())));
            fields.push(("plugin-opts", Yaml::Map(plugin_opts)));
        }
        "v2ray-plugin" => {
            let mut plugin_opts = vec![(
                "mode",
                Yaml::Str(opt("mode").unwrap_or_else(|| "websocket".into())),
            )];
            if opts.iter().any(|(k, _)| *k == "tls") {
                plugin_opts.push(("tls", Yaml::Bool(true)));
            }
            if let Some(host) = opt("host") {
                plugin_opts.push(("host", Yaml::Str(host)));
            }
            if let Some(path) = opt("path") {
                plugin_opts.push(("path", Yaml::Str(path)));
            }
            fields.push(("plugin", Yaml::Str("v2ray-plugin".into())));
            fields.push(("plugin-opts", Yaml::Map(plugin_opts)));
        }
        other => return Err(format!("unsupported shadowsocks plugin '{other}'")),
    }
    Ok(())
}

// ── Shared option builders ──────────────────────────────────────────

/// Normalized transport from the `key` parameter; `tcp` when absent.
fn network(p: &Params, key: &str) -> Result<String, String> {
    let network = p
        .get_non_empty(key)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "tcp".into());
    let network = match network.as_str() {
        "raw" | "none" => "tcp".to_string(),
        "http" => "h2".to_string(),
        _ => network,
    };
    if SUPPORTED_NETWORKS.contains(&network.as_str()) {
        Ok(network)
    } else {
        Err(format!("unsupported network '{network}'"))
    }
}

fn transport_fields(p: &Params, network: &str, fields: &mut Fields) {
    let host = p.get_non_empty("host").map(str::to_string);
    let path = p.get_non_empty("path").map(str::to_string);

    fields.push(("network", Yaml::Str(network.to_string())));
    match network {
        "ws" => {
            let mut opts = vec![("path", Yaml::Str(path.unwrap_or_else(|| "/".into())))];
            if let Some(host) = host {
                opts.push(("headers", Yaml::Map(vec![("Host", Yaml::Str(host))])));
            }
            fields.push(("ws-opts", Yaml::Map(opts)));
        }
        "grpc" => {
            let service = p
                .get_non_empty("serviceName")
                .map(str::to_string)
                .or(path)
                .unwrap_or_default();
            fields.push((
                "grpc-opts",
                Yaml::Map(vec![("grpc-service-name", Yaml::Str(service))]),
            ));
        }
        "h2" => {
            let mut opts = Vec::new();
            if let Some(host) = host {
                opts.push(("host", Yaml::List(vec![host])));
            }
            opts.push(("path", Yaml::Str(path.unwrap_or_else(|| "/".into()))));
            fields.push(("h2-opts", Yaml::Map(opts)));
        }
        "http" => {
            let mut opts = vec![(
                "path",
                Yaml::List(vec![path.unwrap_or_else(|| "/".into())]),
            )];
            if let Some(host) = host {
                opts.push(("headers", Yaml::Map(vec![("Host", Yaml::List(vec![host]))])));
            }
            fields.push(("http-opts", Yaml::Map(opts)));
        }
        _ => {}
    }
}

fn tls_fields(p: &Params, fields: &mut Fields) {
    if let Some(sni) = p.get_non_empty("sni") {
        fields.push(("servername", Yaml::Str(sni.to_string())));
    }
    if let Some(fp) = p.get_non_empty("fp") {
        fields.push(("client-fingerprint", Yaml::Str(fp.to_string())));
    }
    if let Some(alpn) = alpn_list(p) {
        fields.push(("alpn", Yaml::List(alpn)));
    }
    if insecure(p) {
        fields.push(("skip-cert-verify", Yaml::Bool(true)));
    }
}

fn alpn_list(p: &Params) -> Option<Vec<String>> {
    let list: Vec<String> = p
        .get_non_empty("alpn")?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!list.is_empty()).then_some(list)
}

fn insecure(p: &Params) -> bool {
    ["allowInsecure", "insecure"]
        .iter()
        .filter_map(|key| p.get(key))
        .any(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ── YAML writing ────────────────────────────────────────────────────

fn unique_name(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} {n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn write_field(out: &mut String, indent: usize, key: &str, value: &Yaml) {
    let pad = " ".repeat(indent);
    match value {
        Yaml::Str(s) => {
            let _ = writeln!(out, "{pad}{key}: \"{}\"", escape_yaml_string(s));
        }
        Yaml::Num(n) => {
            let _ = writeln!(out, "{pad}{key}: {n}");
        }
        Yaml::Bool(b) => {
            let _ = writeln!(out, "{pad}{key}: {b}");
        }
        Yaml::List(items) => {
            let items: Vec<String> = items
                .iter()
                .map(|item| format!("\"{}\"", escape_yaml_string(item)))
                .collect();
            let _ = writeln!(out, "{pad}{key}: [{}]", items.join(", "));
        }
        Yaml::Map(entries) => {
            let _ = writeln!(out, "{pad}{key}:");
            for (k, v) in entries {
                write_field(out, indent + 2, k, v);
            }
        }
    }
}

/// Escape special characters for YAML double-quoted strings.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links;

    const REALITY: &str = "vless://11111111-2222-3333-4444-555555555555@example.com:443?security=reality&pbk=PUBKEY&sid=abcdef&sni=www.microsoft.com&type=tcp&flow=xtls-rprx-vision&fp=chrome#Sample";

    fn parse(link: &str) -> Node {
        links::parse(link).unwrap()
    }

    #[test]
    fn generate_config_basic_structure() {
        let doc = generate_clash_config(&[parse(REALITY)]);
        assert!(doc.yaml.contains("mixed-port: 7890"));
        assert!(doc.yaml.contains("bind-address: 127.0.0.1"));
        assert!(doc.yaml.contains("allow-lan: false"));
        assert!(doc.yaml.contains("proxy-groups:"));
        assert!(doc.yaml.contains("name: \"nodepool-select\""));
        assert!(doc.yaml.contains("MATCH,nodepool-select"));
        assert!(!doc.yaml.contains("0.0.0.0"));
        assert_eq!(doc.exported, 1);
        assert_eq!(doc.omitted, 0);
    }

    #[test]
    fn vless_reality_fields() {
        let doc = generate_clash_config(&[parse(REALITY)]);
        let yaml = &doc.yaml;
        assert!(yaml.contains("  - name: \"Sample\"\n"));
        assert!(yaml.contains("    type: \"vless\"\n"));
        assert!(yaml.contains("    server: \"example.com\"\n"));
        assert!(yaml.contains("    port: 443\n"));
        assert!(yaml.contains("    uuid: \"11111111-2222-3333-4444-555555555555\"\n"));
        assert!(yaml.contains("    flow: \"xtls-rprx-vision\"\n"));
        assert!(yaml.contains("    network: \"tcp\"\n"));
        assert!(yaml.contains("    tls: true\n"));
        assert!(yaml.contains("    servername: \"www.microsoft.com\"\n"));
        assert!(yaml.contains("    client-fingerprint: \"chrome\"\n"));
        assert!(yaml.contains("    reality-opts:\n      public-key: \"PUBKEY\"\n      short-id: \"abcdef\"\n"));
        assert!(yaml.contains("      - \"Sample\"\n"));
    }

    #[test]
    fn reality_without_public_key_is_omitted() {
        let link = "vless://11111111-2222-3333-4444-555555555555@example.com:443?security=reality&sni=a.com#NoKey";
        let doc = generate_clash_config(&[parse(link)]);
        assert_eq!(doc.exported, 0);
        assert_eq!(doc.omitted, 1);
        assert!(doc.yaml.contains("proxies: []"));
        assert!(doc.yaml.contains("      - DIRECT\n"));
    }

    #[test]
    fn vmess_ws_tls_fields() {
        let node = Node::new(Protocol::Vmess, "vm.example.com", 443, "b831381d-6324-4d53-ad4f-8cda48b30811")
            .with_label("JP")
            .with_param("aid", "0")
            .with_param("net", "ws")
            .with_param("path", "/ray")
            .with_param("host", "cdn.example.com")
            .with_param("tls", "tls");
        let yaml = generate_clash_config(&[node]).yaml;
        assert!(yaml.contains("    alterId: 0\n"));
        assert!(yaml.contains("    cipher: \"auto\"\n"));
        assert!(yaml.contains("    network: \"ws\"\n"));
        assert!(yaml.contains("    ws-opts:\n      path: \"/ray\"\n      headers:\n        Host: \"cdn.example.com\"\n"));
        assert!(yaml.contains("    servername: \"cdn.example.com\"\n"));
    }

    #[test]
    fn trojan_grpc_fields() {
        let node = parse("trojan://pw@t.example.com:443?type=grpc&serviceName=svc&sni=t.example.com&alpn=h2,http/1.1#T");
        let yaml = generate_clash_config(&[node]).yaml;
        assert!(yaml.contains("    password: \"pw\"\n"));
        assert!(yaml.contains("    sni: \"t.example.com\"\n"));
        assert!(yaml.contains("    alpn: [\"h2\", \"http/1.1\"]\n"));
        assert!(yaml.contains("    grpc-opts:\n      grpc-service-name: \"svc\"\n"));
    }

    #[test]
    fn shadowsocks_obfs_plugin() {
        let node = Node::new(Protocol::Shadowsocks, "ss.example.com", 8388, "12345")
            .with_param("method", "aes-256-gcm")
            .with_param("plugin", "obfs-local;obfs=tls;obfs-host=cdn.example.com");
        let yaml = generate_clash_config(&[node]).yaml;
        assert!(yaml.contains("    cipher: \"aes-256-gcm\"\n"));
        // Numeric-looking passwords stay strings.
        assert!(yaml.contains("    password: \"12345\"\n"));
        assert!(yaml.contains("    plugin: \"obfs\"\n"));
        assert!(yaml.contains("    plugin-opts:\n      mode: \"tls\"\n      host: \"cdn.example.com\"\n"));
    }

    #[test]
    fn unsupported_transports_are_counted() {
        let nodes = vec![
            parse("vless://11111111-2222-3333-4444-555555555555@a.example.com:443?type=kcp#KCP"),
            Node::new(Protocol::Shadowsocks, "ss.example.com", 8388, "pw")
                .with_param("method", "aes-256-gcm")
                .with_param("plugin", "kcptun;mode=fast"),
            parse("trojan://pw@t.example.com:443?security=none#Plain"),
            parse("trojan://pw@t.example.com:443#Fine"),
        ];
        let doc = generate_clash_config(&nodes);
        assert_eq!(doc.exported, 1);
        assert_eq!(doc.omitted, 3);
        assert!(doc.yaml.contains("name: \"Fine\""));
    }

    #[test]
    fn duplicate_names_are_made_unique() {
        let nodes = vec![
            parse("trojan://pw@a.example.com:443#Same"),
            parse("trojan://pw@b.example.com:443#Same"),
            parse("trojan://pw@c.example.com:443#Same"),
        ];
        let yaml = generate_clash_config(&nodes).yaml;
        assert!(yaml.contains("  - name: \"Same\"\n"));
        assert!(yaml.contains("  - name: \"Same 2\"\n"));
        assert!(yaml.contains("  - name: \"Same 3\"\n"));
    }

    #[test]
    fn unlabeled_nodes_use_endpoint_name() {
        let yaml = generate_clash_config(&[parse("trojan://pw@a.example.com:443")]).yaml;
        assert!(yaml.contains("  - name: \"a.example.com:443\"\n"));
    }

    #[test]
    fn escape_yaml_string_special_chars() {
        assert_eq!(escape_yaml_string("hello"), "hello");
        assert_eq!(escape_yaml_string("say \"hi\""), "say \\\"hi\\\"");
        assert_eq!(escape_yaml_string("back\\slash"), "back\\\\slash");
        assert_eq!(escape_yaml_string("two\nlines"), "two\\nlines");
    }

    #[test]
    fn network_normalization() {
        let params: Params = [("type", "RAW")].into_iter().collect();
        assert_eq!(network(&params, "type").unwrap(), "tcp");
        let params: Params = [("type", "http")].into_iter().collect();
        assert_eq!(network(&params, "type").unwrap(), "h2");
        let params: Params = [("type", "xhttp")].into_iter().collect();
        assert!(network(&params, "type").is_err());
        assert_eq!(network(&Params::new(), "type").unwrap(), "tcp");
    }
}
