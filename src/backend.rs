//! Resource directory handling for configured backends.
//!
//! `LinkFormatSink` parses the `/.well-known/core` answer of every newly
//! registered node (CoRE Link Format, RFC 6690) and keeps the resulting
//! resource list, exposed under the backend's path prefix as
//! `<path_prefix>/<node>/<resource path>`.

use async_trait::async_trait;
use coapreg_core::types::DiscoveryResponse;
use coapreg_registration::ResourceDirectorySink;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// One link-value of a link-format document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub target: String,
    /// Link parameters in document order; valueless parameters map to `None`.
    pub params: Vec<(String, Option<String>)>,
}

impl Link {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Keeps the discovered resources of one backend's nodes.
#[derive(Debug)]
pub struct LinkFormatSink {
    path_prefix: String,
    resources: RwLock<HashMap<IpAddr, Vec<Link>>>,
}

impl LinkFormatSink {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into().trim_end_matches('/').to_string(),
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Paths under which `node`'s resources are exposed.
    pub fn exposed_paths(&self, node: IpAddr) -> Vec<String> {
        self.resources
            .read()
            .get(&node)
            .map(|links| {
                links
                    .iter()
                    .map(|link| {
                        let target = link.target.trim_start_matches('/');
                        format!("{}/{}/{}", self.path_prefix, node, target)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.resources.read().len()
    }
}

#[async_trait]
impl ResourceDirectorySink for LinkFormatSink {
    async fn process_resource_directory(&self, response: DiscoveryResponse, node: IpAddr) {
        if !response.is_success() {
            warn!(
                node = %node,
                code = %response.code,
                "Node refused resource discovery"
            );
            return;
        }

        match response.content_format {
            None | Some(DiscoveryResponse::LINK_FORMAT) => {}
            Some(other) => {
                warn!(
                    node = %node,
                    content_format = other,
                    "Resource directory is not link-format"
                );
                return;
            }
        }

        let Some(document) = response.payload_str() else {
            warn!(node = %node, "Resource directory is not valid UTF-8");
            return;
        };

        let links = parse_link_format(document);
        for link in &links {
            debug!(
                node = %node,
                resource = %link.target,
                rt = ?link.param("rt"),
                "Discovered resource"
            );
        }
        let count = links.len();
        self.resources.write().insert(node, links);

        info!(
            node = %node,
            resources = count,
            nodes = self.node_count(),
            path_prefix = %self.path_prefix,
            "Resource directory stored"
        );
        for path in self.exposed_paths(node) {
            debug!(path = %path, "Resource exposed");
        }
    }
}

/// Parses a CoRE Link Format document. Malformed link-values are skipped.
pub fn parse_link_format(document: &str) -> Vec<Link> {
    split_outside_quotes(document, ',')
        .into_iter()
        .filter_map(|value| parse_link_value(value.trim()))
        .collect()
}

fn parse_link_value(value: &str) -> Option<Link> {
    let rest = value.strip_prefix('<')?;
    let end = rest.find('>')?;
    let target = rest[..end].to_string();

    let params = split_outside_quotes(&rest[end + 1..], ';')
        .into_iter()
        .map(str::trim)
        .filter(|param| !param.is_empty())
        .map(|param| match param.split_once('=') {
            Some((key, value)) => {
                let value = value.trim().trim_matches('"').to_string();
                (key.trim().to_string(), Some(value))
            }
            None => (param.to_string(), None),
        })
        .collect();

    Some(Link { target, params })
}

/// Splits on `separator`, ignoring separators inside quotes or `<...>`.
fn split_outside_quotes(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_target = false;
    let mut start = 0;

    for (index, c) in input.char_indices() {
        match c {
            '"' if !in_target => in_quotes = !in_quotes,
            '<' if !in_quotes => in_target = true,
            '>' if !in_quotes => in_target = false,
            c if c == separator && !in_quotes && !in_target => {
                parts.push(&input[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}
