//! `trojan://<password>@<host>:<port>?<query>#<label>`

use super::{authority_host, decode_component, parse_query, render_query, render_suffix, split_link};
use crate::error::ParseError;
use crate::node::{Node, Params, Protocol};

pub(super) fn parse(rest: &str) -> Result<Node, ParseError> {
    let parts = split_link(Protocol::Trojan, rest)?;
    // A missing password is preserved as empty rather than rejected.
    let password = parts.userinfo.map(decode_component).unwrap_or_default();

    let mut parameters = Params::new();
    parse_query(parts.query, &mut parameters);

    let mut node = Node::new(Protocol::Trojan, parts.host, parts.port, password);
    node.label = parts.fragment.map(decode_component).unwrap_or_default();
    node.parameters = parameters;
    Ok(node)
}

pub(super) fn render(node: &Node) -> String {
    format!(
        "trojan://{}@{}:{}{}",
        urlencoding::encode(&node.identity),
        authority_host(&node.host),
        node.port,
        render_suffix(&render_query(&node.parameters, &[]), &node.label),
    )
}
