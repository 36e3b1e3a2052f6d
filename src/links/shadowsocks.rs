//! `ss://` links, SIP002 and legacy.
//!
//! ```text
//! ss://<base64(method:password)>@<host>:<port>/?plugin=...#<label>   (SIP002)
//! ss://<method>:<password>@<host>:<port>#<label>                     (SIP002, percent-encoded userinfo)
//! ss://<base64(method:password@host:port)>#<label>                    (legacy)
//! ```
//!
//! The cipher method is stored as the `method` parameter, ahead of any query
//! parameters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use super::{
    authority_host, decode_base64_lenient, decode_component, parse_query, render_query,
    split_host_port, split_link,
};
use crate::error::ParseError;
use crate::node::{Node, Params, Protocol};

pub(super) fn parse(rest: &str) -> Result<Node, ParseError> {
    let (body, fragment) = match rest.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (rest, None),
    };

    let (method, password, host, port, query) = if body.contains('@') {
        let parts = split_link(Protocol::Shadowsocks, body)?;
        let userinfo = parts
            .userinfo
            .ok_or_else(|| ParseError::malformed(Protocol::Shadowsocks, "missing credentials"))?;
        let (method, password) = decode_credentials(userinfo)?;
        (method, password, parts.host, parts.port, parts.query)
    } else {
        let (encoded, query) = match body.split_once('?') {
            Some((head, q)) => (head, Some(q)),
            None => (body, None),
        };
        let decoded = decode_base64_lenient(encoded)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| ParseError::malformed(Protocol::Shadowsocks, "payload is not base64"))?;
        let (creds, authority) = decoded
            .rsplit_once('@')
            .ok_or_else(|| ParseError::malformed(Protocol::Shadowsocks, "missing '@' in payload"))?;
        let (method, password) = split_method(creds)?;
        let (host, port) = split_host_port(Protocol::Shadowsocks, authority.trim())?;
        (method, password, host, port, query)
    };

    let mut parameters = Params::new();
    parameters.insert("method", method);
    parse_query(query, &mut parameters);

    let mut node = Node::new(Protocol::Shadowsocks, host, port, password);
    node.label = fragment.map(decode_component).unwrap_or_default();
    node.parameters = parameters;
    Ok(node)
}

pub(super) fn render(node: &Node) -> String {
    let method = node.parameters.get("method").unwrap_or_default();
    let userinfo = URL_SAFE_NO_PAD.encode(format!("{method}:{}", node.identity));
    let query = render_query(&node.parameters, &["method"]);

    let mut link = format!("ss://{userinfo}@{}:{}", authority_host(&node.host), node.port);
    if !query.is_empty() {
        link.push_str("/?");
        link.push_str(&query);
    }
    if !node.label.is_empty() {
        link.push('#');
        link.push_str(&urlencoding::encode(&node.label));
    }
    link
}

/// Userinfo is either base64 of `method:password` or percent-encoded plain text.
fn decode_credentials(userinfo: &str) -> Result<(String, String), ParseError> {
    let userinfo = decode_component(userinfo);
    if let Some(text) = decode_base64_lenient(&userinfo)
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|text| text.contains(':'))
    {
        return split_method(&text);
    }
    split_method(&userinfo)
}

fn split_method(creds: &str) -> Result<(String, String), ParseError> {
    let (method, password) = creds
        .split_once(':')
        .ok_or_else(|| ParseError::malformed(Protocol::Shadowsocks, "credentials lack 'method:password'"))?;
    let method = method.trim();
    if method.is_empty() {
        return Err(ParseError::malformed(Protocol::Shadowsocks, "empty cipher method"));
    }
    Ok((method.to_ascii_lowercase(), password.to_string()))
}
