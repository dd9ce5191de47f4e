//! Graph snapshots and content checksums
//!
//! A [`Snapshot`] is the wire form of a graph. Its checksum covers only the
//! structure of the graph: node ids and types, links, groups and the id
//! counters. Layout, widget values, colours and insertion order do not
//! affect it, so the checksum identifies "the same workflow" across edits
//! that do not change its shape.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::compiler::sanitize_name;
use crate::error::Result;
use crate::graph::{Graph, InputSlot, Link, LinkId, Node, NodeId, OutputSlot};
use crate::registry::{ExtensionRegistry, NodeTypeRegistry};

/// Version tag written into every snapshot.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serialized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub inputs: Vec<InputSlot>,
    #[serde(default)]
    pub outputs: Vec<OutputSlot>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub widgets_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgcolor: Option<String>,
    /// Layout fields (`pos`, `size`, `flags`, `order`, ...).
    #[serde(flatten)]
    pub layout: Map<String, Value>,
}

impl From<&Node> for SerializedNode {
    fn from(node: &Node) -> Self {
        let mut widgets_values: Vec<Value> =
            node.widgets.iter().map(|widget| widget.value.clone()).collect();
        widgets_values.extend(node.unbound_widget_values.iter().cloned());

        Self {
            id: node.id,
            node_type: node.node_type.clone(),
            title: Some(node.title.clone()),
            mode: node.mode.as_u8(),
            inputs: node.inputs.clone(),
            outputs: node.outputs.clone(),
            properties: node.properties.clone(),
            widgets_values,
            color: node.color.clone(),
            bgcolor: node.bgcolor.clone(),
            layout: node.layout.clone(),
        }
    }
}

impl SerializedNode {
    /// Build a live node, starting from the registered type when known.
    pub fn to_node(&self, registry: &NodeTypeRegistry) -> Node {
        let mut node = registry
            .instantiate(&self.node_type)
            .unwrap_or_else(|| Node::new(self.node_type.clone()));

        node.id = self.id;
        if let Some(title) = &self.title {
            node.title = title.clone();
        }
        node.mode = self.mode.into();
        if !self.inputs.is_empty() {
            node.inputs = self.inputs.clone();
        }
        if !self.outputs.is_empty() {
            node.outputs = self.outputs.clone();
        }
        node.properties
            .extend(self.properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut values = self.widgets_values.iter();
        for widget in node.widgets.iter_mut() {
            match values.next() {
                Some(value) => widget.value = value.clone(),
                None => break,
            }
        }
        node.unbound_widget_values = values.cloned().collect();

        if self.color.is_some() {
            node.color = self.color.clone();
        }
        if self.bgcolor.is_some() {
            node.bgcolor = self.bgcolor.clone();
        }
        node.layout = self.layout.clone();
        node
    }
}

/// Immutable serialized graph plus its structural checksum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub last_node_id: NodeId,
    #[serde(default)]
    pub last_link_id: LinkId,
    /// Nodes sorted by id.
    #[serde(default)]
    pub nodes: Vec<SerializedNode>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub groups: Vec<Value>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    #[serde(rename = "NeoScaffoldVersion", default, deserialize_with = "lenient_version")]
    pub version: String,
    #[serde(default)]
    pub checksum: String,
    /// Top-level fields this client does not interpret, such as the editor's
    /// own `version`.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Snapshot {
    /// Parse a snapshot from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn lenient_version<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(version) => version,
        Value::Number(version) => version.to_string(),
        _ => String::new(),
    })
}

#[derive(Serialize)]
struct NodeStub<'a> {
    id: NodeId,
    #[serde(rename = "type")]
    node_type: &'a str,
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    last_node_id: NodeId,
    last_link_id: LinkId,
    links: &'a [Link],
    groups: &'a [Value],
    nodes: Vec<NodeStub<'a>>,
}

/// SHA-256 of `data`, base64 encoded with the standard padded alphabet.
pub fn digest_base64(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

/// Structural checksum of a snapshot.
pub fn snapshot_checksum(snapshot: &Snapshot) -> Result<String> {
    let mut nodes: Vec<NodeStub<'_>> = snapshot
        .nodes
        .iter()
        .map(|node| NodeStub {
            id: node.id,
            node_type: &node.node_type,
        })
        .collect();
    nodes.sort_by_key(|node| node.id);

    let input = ChecksumInput {
        last_node_id: snapshot.last_node_id,
        last_link_id: snapshot.last_link_id,
        links: &snapshot.links,
        groups: &snapshot.groups,
        nodes,
    };
    Ok(digest_base64(serde_json::to_string(&input)?.as_bytes()))
}

/// Snapshot the graph and attach its checksum and the client version.
pub fn serialize(graph: &Graph) -> Result<Snapshot> {
    let mut snapshot = graph.to_snapshot();
    snapshot.checksum = snapshot_checksum(&snapshot)?;
    snapshot.version = CLIENT_VERSION.to_string();
    debug!(checksum = %snapshot.checksum, nodes = snapshot.nodes.len(), "serialized graph");
    Ok(snapshot)
}

/// Outcome of loading a snapshot into a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Node types absent from the registry, first-seen order.
    pub missing_types: Vec<String>,
}

impl ImportReport {
    /// User-facing notice for missing node types, if any.
    pub fn missing_types_notice(&self) -> Option<String> {
        if self.missing_types.is_empty() {
            None
        } else {
            Some(format!(
                "Missing node types: {}",
                self.missing_types.join(", ")
            ))
        }
    }
}

/// Replace `graph` with the contents of `snapshot`.
///
/// Unknown node types are kept as placeholders under their sanitized name
/// and reported; they never fail the import. A snapshot that cannot be
/// configured leaves `graph` as it was.
pub fn import(
    graph: &mut Graph,
    extensions: &ExtensionRegistry,
    snapshot: &Snapshot,
) -> Result<ImportReport> {
    let mut working = snapshot.clone();
    for plugin in extensions.plugins() {
        plugin.before_configure(&mut working);
    }

    let registry = extensions.node_types();
    let mut seen = HashSet::new();
    let mut report = ImportReport::default();
    for node in working.nodes.iter_mut() {
        if registry.contains(&node.node_type) {
            continue;
        }
        if seen.insert(node.node_type.clone()) {
            report.missing_types.push(node.node_type.clone());
        }
        node.node_type = sanitize_name(&node.node_type);
    }

    graph.configure(&working, registry)?;

    for plugin in extensions.plugins() {
        plugin.after_configure(graph, &report.missing_types);
    }
    info!(
        nodes = graph.len(),
        missing = report.missing_types.len(),
        "imported workflow"
    );
    Ok(report)
}
