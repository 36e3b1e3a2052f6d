//! `vless://<uuid>@<host>:<port>?<query>#<label>`

use uuid::Uuid;

use super::{authority_host, decode_component, parse_query, render_query, render_suffix, split_link};
use crate::error::ParseError;
use crate::node::{Node, Params, Protocol};

pub(super) fn parse(rest: &str) -> Result<Node, ParseError> {
    let parts = split_link(Protocol::Vless, rest)?;
    let raw_id = parts
        .userinfo
        .map(decode_component)
        .ok_or_else(|| ParseError::malformed(Protocol::Vless, "missing uuid"))?;
    let uuid = Uuid::parse_str(raw_id.trim())
        .map_err(|e| ParseError::malformed(Protocol::Vless, format!("invalid uuid: {e}")))?;

    let mut parameters = Params::new();
    parse_query(parts.query, &mut parameters);

    let mut node = Node::new(
        Protocol::Vless,
        parts.host,
        parts.port,
        uuid.hyphenated().to_string(),
    );
    node.label = parts.fragment.map(decode_component).unwrap_or_default();
    node.parameters = parameters;
    Ok(node)
}

pub(super) fn render(node: &Node) -> String {
    format!(
        "vless://{}@{}:{}{}",
        urlencoding::encode(&node.identity),
        authority_host(&node.host),
        node.port,
        render_suffix(&render_query(&node.parameters, &[]), &node.label),
    )
}
