//! Share-link parsing and rendering.
//!
//! Dispatches on the URI scheme to one of the four protocol modules. Every
//! function here is pure: no network or disk access.
//!
//! # Shapes
//! ```text
//! vless://<uuid>@<host>:<port>?<query>#<label>
//! vmess://<base64 JSON {add, port, id, ps, ...}>
//! trojan://<password>@<host>:<port>?<query>#<label>
//! ss://<base64(method:password)>@<host>:<port>/?<query>#<label>
//! ss://<base64(method:password@host:port)>#<label>
//! ```

mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::error::ParseError;
use crate::node::{Node, Params, Protocol};

/// Base64 decoder accepting padded or unpadded input with relaxed trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Parse one share link into a node.
///
/// Surrounding whitespace is not part of a link: the input is trimmed before
/// parsing, and `original_link` holds the trimmed text.
pub fn parse(raw: &str) -> Result<Node, ParseError> {
    let raw = raw.trim();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return Err(ParseError::UnknownScheme {
            scheme: String::new(),
        });
    };
    let protocol = Protocol::from_scheme(scheme).ok_or_else(|| ParseError::UnknownScheme {
        scheme: scheme.to_string(),
    })?;

    let mut node = match protocol {
        Protocol::Vless => vless::parse(rest)?,
        Protocol::Vmess => vmess::parse(rest)?,
        Protocol::Trojan => trojan::parse(rest)?,
        Protocol::Shadowsocks => shadowsocks::parse(rest)?,
    };
    node.original_link = raw.to_string();
    Ok(node)
}

/// Render a node back into a share link for its protocol.
///
/// Fails when the node cannot be expressed as a link that re-parses to the
/// same fingerprint, e.g. a shadowsocks node without a `method` parameter or
/// a vless node whose identity is not a canonical UUID.
pub fn to_link(node: &Node) -> Result<String, ParseError> {
    let link = match node.protocol {
        Protocol::Vless => vless::render(node),
        Protocol::Vmess => vmess::render(node),
        Protocol::Trojan => trojan::render(node),
        Protocol::Shadowsocks => shadowsocks::render(node),
    };
    let reparsed = parse(&link)?;
    if reparsed.fingerprint() != node.fingerprint() {
        return Err(ParseError::malformed(
            node.protocol,
            "rendered link does not reproduce the node identity",
        ));
    }
    Ok(link)
}

/// Outcome of parsing a batch of lines.
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub nodes: Vec<Node>,
    pub rejected: usize,
    pub errors: Vec<ParseError>,
}

/// Whether a line carries no link (blank or comment).
pub fn is_ignorable(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

/// Parse many lines, collecting rejections instead of failing.
pub fn parse_batch<I, S>(raws: I) -> ParsedBatch
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut batch = ParsedBatch::default();
    for raw in raws {
        let raw = raw.as_ref();
        if is_ignorable(raw) {
            continue;
        }
        match parse(raw) {
            Ok(node) => batch.nodes.push(node),
            Err(e) => {
                tracing::debug!("skipping share link: {e}");
                batch.rejected += 1;
                batch.errors.push(e);
            }
        }
    }
    batch
}

/// Parse many lines, silently skipping anything unparsable.
pub fn parse_all<I, S>(raws: I) -> Vec<Node>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parse_batch(raws).nodes
}

// ── Shared component helpers ────────────────────────────────────────

/// Components of an authority-style link (`userinfo@host:port/path?query#fragment`).
pub(crate) struct LinkParts<'a> {
    pub userinfo: Option<&'a str>,
    pub host: String,
    pub port: u16,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

/// Split an authority-style link body (everything after `scheme://`).
pub(crate) fn split_link(protocol: Protocol, rest: &str) -> Result<LinkParts<'_>, ParseError> {
    let (rest, fragment) = match rest.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (rest, None),
    };
    let (rest, query) = match rest.split_once('?') {
        Some((head, q)) => (head, Some(q)),
        None => (rest, None),
    };
    let (userinfo, authority) = match rest.rsplit_once('@') {
        Some((user, auth)) => (Some(user), auth),
        None => (None, rest),
    };
    // Drop any path (`host:port/`), used by SIP002 before the query.
    let authority = authority.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ParseError::malformed(protocol, "missing authority"));
    }
    let (host, port) = split_host_port(protocol, authority)?;

    Ok(LinkParts {
        userinfo,
        host,
        port,
        query,
        fragment,
    })
}

/// Split `host:port` or `[v6]:port`; brackets are stripped from the host.
pub(crate) fn split_host_port(protocol: Protocol, authority: &str) -> Result<(String, u16), ParseError> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| ParseError::malformed(protocol, "unterminated IPv6 host"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| ParseError::malformed(protocol, "missing port"))?;
        (host, port)
    } else {
        authority
            .rsplit_once(':')
            .ok_or_else(|| ParseError::malformed(protocol, "missing port"))?
    };

    let host = host.trim();
    if host.is_empty() {
        return Err(ParseError::malformed(protocol, "empty host"));
    }
    let port = parse_port(protocol, port)?;
    Ok((host.to_string(), port))
}

pub(crate) fn parse_port(protocol: Protocol, raw: &str) -> Result<u16, ParseError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ParseError::malformed(
            protocol,
            format!("invalid port '{raw}'"),
        )),
        Ok(port) => Ok(port),
    }
}

/// Percent-decode a link component, keeping the raw text if it is not valid UTF-8.
pub(crate) fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

/// Decode a query string into ordered params. Empty segments are skipped.
pub(crate) fn parse_query(query: Option<&str>, params: &mut Params) {
    let Some(query) = query else { return };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key), decode_component(value));
    }
}

/// Encode params as a query string, skipping `exclude` keys.
pub(crate) fn render_query(params: &Params, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(k, _)| !exclude.contains(k))
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Host as it appears in an authority (IPv6 literals re-bracketed).
pub(crate) fn authority_host(host: &str) -> Cow<'_, str> {
    if host.contains(':') {
        Cow::Owned(format!("[{host}]"))
    } else {
        Cow::Borrowed(host)
    }
}

/// `?query` and `#fragment` suffix shared by the authority-style renderers.
pub(crate) fn render_suffix(query: &str, label: &str) -> String {
    let mut out = String::new();
    if !query.is_empty() {
        out.push('?');
        out.push_str(query);
    }
    if !label.is_empty() {
        out.push('#');
        out.push_str(&urlencoding::encode(label));
    }
    out
}

/// Decode base64 in any of the common flavours: padded or not, standard or URL-safe.
pub fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    if normalized.is_empty() {
        return None;
    }
    LENIENT_BASE64.decode(normalized.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Health;

    const SCENARIO_A: &str = "vless://11111111-2222-3333-4444-555555555555@example.com:443?security=reality&pbk=PUBKEY&sid=abcdef&sni=www.microsoft.com&type=tcp#Sample";

    #[test]
    fn parses_reality_vless_link() {
        let node = parse(SCENARIO_A).unwrap();
        assert_eq!(node.protocol, Protocol::Vless);
        assert_eq!(node.host, "example.com");
        assert_eq!(node.port, 443);
        assert_eq!(node.identity, "11111111-2222-3333-4444-555555555555");
        assert_eq!(node.label, "Sample");
        assert_eq!(node.parameters.get("security"), Some("reality"));
        assert_eq!(node.parameters.get("pbk"), Some("PUBKEY"));
        assert_eq!(node.parameters.get("sid"), Some("abcdef"));
        assert_eq!(node.original_link, SCENARIO_A);
        assert_eq!(node.healthy, Health::Unknown);
        assert_eq!(node.latency_ms, None);
    }

    #[test]
    fn parse_is_deterministic() {
        assert_eq!(parse(SCENARIO_A).unwrap(), parse(SCENARIO_A).unwrap());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            parse("hysteria2://pw@h.example.com:443"),
            Err(ParseError::UnknownScheme { ref scheme }) if scheme == "hysteria2"
        ));
        assert!(matches!(
            parse("just some text"),
            Err(ParseError::UnknownScheme { .. })
        ));
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        let node = parse("TROJAN://pw@t.example.com:443#T").unwrap();
        assert_eq!(node.protocol, Protocol::Trojan);
    }

    #[test]
    fn batch_skips_bad_lines_and_comments() {
        let lines = vec![
            "",
            "# comment",
            "// also a comment",
            SCENARIO_A,
            "vless://not-a-uuid@example.com:443",
            "ftp://example.com",
            "trojan://pw@t.example.com:443#T",
        ];
        let batch = parse_batch(&lines);
        assert_eq!(batch.nodes.len(), 2);
        assert_eq!(batch.rejected, 2);
        assert_eq!(batch.errors.len(), 2);
        assert_eq!(parse_all(&lines).len(), 2);
    }

    #[test]
    fn ipv6_hosts_are_unbracketed() {
        let node = parse("trojan://pw@[2001:db8::1]:443#v6").unwrap();
        assert_eq!(node.host, "2001:db8::1");
        let relinked = to_link(&Node { original_link: String::new(), ..node }).unwrap();
        assert!(relinked.contains("@[2001:db8::1]:443"));
    }

    #[test]
    fn port_must_be_valid() {
        assert!(parse("trojan://pw@t.example.com:0").is_err());
        assert!(parse("trojan://pw@t.example.com:70000").is_err());
        assert!(parse("trojan://pw@t.example.com").is_err());
    }

    #[test]
    fn lenient_base64_accepts_all_flavours() {
        // "subjects?" exercises the URL-safe alphabet ('_' / '/').
        let expected = b"subjects?_".to_vec();
        for encoded in [
            "c3ViamVjdHM/Xw==",
            "c3ViamVjdHM/Xw",
            "c3ViamVjdHM_Xw==",
            "c3ViamVjdHM_Xw",
        ] {
            assert_eq!(decode_base64_lenient(encoded), Some(expected.clone()), "{encoded}");
        }
        assert_eq!(decode_base64_lenient(""), None);
        assert_eq!(decode_base64_lenient("!!!"), None);
    }

    #[test]
    fn round_trip_preserves_fingerprint_for_every_protocol() {
        let links = [
            SCENARIO_A,
            "vmess://eyJ2IjoiMiIsInBzIjoiSlAiLCJhZGQiOiJ2bS5leGFtcGxlLmNvbSIsInBvcnQiOiI0NDMiLCJpZCI6ImI4MzEzODFkLTYzMjQtNGQ1My1hZDRmLThjZGE0OGIzMDgxMSIsImFpZCI6IjAiLCJuZXQiOiJ3cyIsInRscyI6InRscyJ9",
            "trojan://p%40ss@t.example.com:8443?sni=t.example.com#Trojan%20SG",
            "ss://YWVzLTI1Ni1nY206c2VjcmV0@ss.example.com:8388#SS",
        ];
        for link in links {
            let parsed = parse(link).unwrap();
            let rendered = to_link(&parsed).unwrap();
            let reparsed = parse(&rendered).unwrap();
            assert_eq!(parsed.fingerprint(), reparsed.fingerprint(), "{link} -> {rendered}");
            assert_eq!(parsed.label, reparsed.label);
        }
    }

    #[test]
    fn unrenderable_nodes_are_reported() {
        let no_method = Node::new(Protocol::Shadowsocks, "s.example.com", 8388, "pw");
        assert!(matches!(
            to_link(&no_method),
            Err(ParseError::Malformed { protocol: Protocol::Shadowsocks, .. })
        ));

        let bad_uuid = Node::new(Protocol::Vless, "v.example.com", 443, "not-a-uuid");
        assert!(to_link(&bad_uuid).is_err());

        // Re-parsing would canonicalize the UUID into a different identity.
        let upper = Node::new(Protocol::Vless, "v.example.com", 443, "AAAAAAAA-2222-3333-4444-555555555555");
        assert!(to_link(&upper).is_err());

        let zero_port = Node::new(Protocol::Trojan, "t.example.com", 0, "pw");
        assert!(to_link(&zero_port).is_err());
    }

    #[test]
    fn surrounding_whitespace_is_trimmed_from_original_link() {
        let node = parse("  trojan://pw@t.example.com:443#T \r\n").unwrap();
        assert_eq!(node.original_link, "trojan://pw@t.example.com:443#T");
    }
}
