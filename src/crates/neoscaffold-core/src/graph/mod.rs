//! Editable node graph
//!
//! Nodes live in an insertion-ordered arena indexed by id; links are kept by
//! id and mirrored on the slots they connect. Every link references existing
//! nodes and in-range slots: [`Graph::connect`] and [`Graph::configure`]
//! reject anything else.
//!
//! # Example
//!
//! ```rust
//! use neoscaffold_core::graph::{Graph, Node};
//!
//! let mut graph = Graph::new();
//! let source = graph.add_node(Node::new("Constant").with_output("value", "number"));
//! let sink = graph.add_node(Node::new("Print").with_input("value", "number"));
//! graph.connect(source, 0, sink, 0).unwrap();
//!
//! assert_eq!(graph.compute_execution_order(), vec![source, sink]);
//! ```

mod link;
mod node;

pub use link::Link;
pub use node::{palette, InputSlot, Node, NodeMode, OutputSlot, Widget};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, ScaffoldError};
use crate::registry::NodeTypeRegistry;
use crate::serializer::{SerializedNode, Snapshot};

/// Node identifier, unique within a graph.
pub type NodeId = i64;

/// Link identifier, unique within a graph.
pub type LinkId = i64;

/// The editing graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    links: BTreeMap<LinkId, Link>,
    groups: Vec<Value>,
    config: Map<String, Value>,
    extra: Map<String, Value>,
    other: Map<String, Value>,
    last_node_id: NodeId,
    last_link_id: LinkId,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        match self.index.get(&id) {
            Some(&i) => Some(&mut self.nodes[i]),
            None => None,
        }
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn groups(&self) -> &[Value] {
        &self.groups
    }

    pub fn add_group(&mut self, group: Value) {
        self.groups.push(group);
    }

    pub fn last_node_id(&self) -> NodeId {
        self.last_node_id
    }

    pub fn last_link_id(&self) -> LinkId {
        self.last_link_id
    }

    /// Link feeding the given input slot, if any.
    pub fn input_link(&self, node_id: NodeId, slot: usize) -> Option<&Link> {
        let link_id = self.node(node_id)?.inputs.get(slot)?.link?;
        self.links.get(&link_id)
    }

    /// Add a node, assigning a fresh id when it has none or its id is taken.
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        if node.id <= 0 || self.index.contains_key(&node.id) {
            node.id = self.last_node_id + 1;
        }
        self.last_node_id = self.last_node_id.max(node.id);
        let id = node.id;
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Remove a node together with every link touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let position = *self.index.get(&id)?;
        let attached: Vec<LinkId> = self
            .links
            .values()
            .filter(|link| link.origin_id == id || link.target_id == id)
            .map(|link| link.id)
            .collect();
        for link_id in attached {
            self.detach_link(link_id);
        }

        let node = self.nodes.remove(position);
        self.reindex();
        Some(node)
    }

    /// Connect an output slot to an input slot, replacing any link already
    /// feeding that input.
    pub fn connect(
        &mut self,
        origin_id: NodeId,
        origin_slot: usize,
        target_id: NodeId,
        target_slot: usize,
    ) -> Result<LinkId> {
        let origin = self
            .node(origin_id)
            .ok_or(ScaffoldError::NodeNotFound(origin_id))?;
        let data_type = origin
            .outputs
            .get(origin_slot)
            .map(|slot| slot.slot_type.clone())
            .ok_or_else(|| {
                ScaffoldError::Validation(format!(
                    "node {} has no output slot {}",
                    origin_id, origin_slot
                ))
            })?;
        let target = self
            .node(target_id)
            .ok_or(ScaffoldError::NodeNotFound(target_id))?;
        if target_slot >= target.inputs.len() {
            return Err(ScaffoldError::Validation(format!(
                "node {} has no input slot {}",
                target_id, target_slot
            )));
        }

        self.disconnect_input(target_id, target_slot);

        let id = self.last_link_id + 1;
        self.last_link_id = id;
        self.links.insert(
            id,
            Link {
                id,
                origin_id,
                origin_slot,
                target_id,
                target_slot,
                data_type,
            },
        );
        if let Some(origin) = self.node_mut(origin_id) {
            origin.outputs[origin_slot].links.push(id);
        }
        if let Some(target) = self.node_mut(target_id) {
            target.inputs[target_slot].link = Some(id);
        }
        debug!(link = id, origin_id, target_id, "connected nodes");
        Ok(id)
    }

    /// Remove the link feeding an input slot.
    pub fn disconnect_input(&mut self, target_id: NodeId, target_slot: usize) -> Option<Link> {
        let link_id = self.node(target_id)?.inputs.get(target_slot)?.link?;
        self.detach_link(link_id)
    }

    /// Drop every node, link and group.
    pub fn clear(&mut self) {
        *self = Graph::new();
    }

    fn detach_link(&mut self, link_id: LinkId) -> Option<Link> {
        let link = self.links.remove(&link_id)?;
        if let Some(origin) = self.node_mut(link.origin_id) {
            if let Some(slot) = origin.outputs.get_mut(link.origin_slot) {
                slot.links.retain(|&id| id != link_id);
            }
        }
        if let Some(target) = self.node_mut(link.target_id) {
            if let Some(slot) = target.inputs.get_mut(link.target_slot) {
                if slot.link == Some(link_id) {
                    slot.link = None;
                }
            }
        }
        Some(link)
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id, i))
            .collect();
    }

    /// Order nodes so every node follows the nodes feeding it.
    ///
    /// Nodes without bound inputs seed the order in insertion order. Nodes
    /// caught in cycles never become ready and are appended by id.
    pub fn compute_execution_order(&self) -> Vec<NodeId> {
        let mut remaining: HashMap<NodeId, usize> = HashMap::new();
        let mut ready = VecDeque::new();

        for node in &self.nodes {
            let bound = node
                .inputs
                .iter()
                .filter(|slot| slot.link.map_or(false, |id| self.links.contains_key(&id)))
                .count();
            if bound == 0 {
                ready.push_back(node.id);
            } else {
                remaining.insert(node.id, bound);
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited_links = HashSet::new();
        while let Some(id) = ready.pop_front() {
            order.push(id);
            let Some(node) = self.node(id) else { continue };
            for output in &node.outputs {
                for link_id in &output.links {
                    let Some(link) = self.links.get(link_id) else { continue };
                    if !visited_links.insert(link.id) {
                        continue;
                    }
                    if let Some(count) = remaining.get_mut(&link.target_id) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            remaining.remove(&link.target_id);
                            ready.push_back(link.target_id);
                        }
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let mut leftover: Vec<NodeId> = remaining.into_keys().collect();
            leftover.sort_unstable();
            warn!(nodes = ?leftover, "graph contains a cycle; appending unresolved nodes");
            order.extend(leftover);
        }
        order
    }

    /// Serialized form of the graph, nodes sorted by id, without a checksum.
    pub fn to_snapshot(&self) -> Snapshot {
        let mut nodes: Vec<SerializedNode> = self.nodes.iter().map(SerializedNode::from).collect();
        nodes.sort_by_key(|node| node.id);

        Snapshot {
            last_node_id: self.last_node_id,
            last_link_id: self.last_link_id,
            nodes,
            links: self.links.values().cloned().collect(),
            groups: self.groups.clone(),
            config: self.config.clone(),
            extra: self.extra.clone(),
            version: String::new(),
            checksum: String::new(),
            other: self.other.clone(),
        }
    }

    /// Replace the graph with the contents of a snapshot.
    ///
    /// The new graph is built separately and only swapped in once every node
    /// and link has been accepted, so a failure leaves `self` untouched.
    pub fn configure(&mut self, snapshot: &Snapshot, registry: &NodeTypeRegistry) -> Result<()> {
        let mut graph = Graph {
            groups: snapshot.groups.clone(),
            config: snapshot.config.clone(),
            extra: snapshot.extra.clone(),
            other: snapshot.other.clone(),
            ..Graph::default()
        };

        for serialized in &snapshot.nodes {
            if graph.index.contains_key(&serialized.id) {
                return Err(ScaffoldError::Configuration(format!(
                    "duplicate node id {}",
                    serialized.id
                )));
            }
            let node = serialized.to_node(registry);
            graph.index.insert(node.id, graph.nodes.len());
            graph.last_node_id = graph.last_node_id.max(node.id);
            graph.nodes.push(node);
        }

        for link in &snapshot.links {
            let origin_ok = graph
                .node(link.origin_id)
                .map_or(false, |node| link.origin_slot < node.outputs.len());
            let target_ok = graph
                .node(link.target_id)
                .map_or(false, |node| link.target_slot < node.inputs.len());
            if !origin_ok || !target_ok {
                return Err(ScaffoldError::Configuration(format!(
                    "link {} connects {}:{} to {}:{} which do not exist",
                    link.id, link.origin_id, link.origin_slot, link.target_id, link.target_slot
                )));
            }
            if graph.links.insert(link.id, link.clone()).is_some() {
                return Err(ScaffoldError::Configuration(format!(
                    "duplicate link id {}",
                    link.id
                )));
            }
            graph.last_link_id = graph.last_link_id.max(link.id);
        }

        graph.last_node_id = graph.last_node_id.max(snapshot.last_node_id);
        graph.last_link_id = graph.last_link_id.max(snapshot.last_link_id);
        *self = graph;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::new("Source").with_output("out", "number"));
        let b = graph.add_node(
            Node::new("Double")
                .with_input("in", "number")
                .with_output("out", "number"),
        );
        let c = graph.add_node(Node::new("Sink").with_input("in", "number"));
        graph.connect(b, 0, c, 0).unwrap();
        graph.connect(a, 0, b, 0).unwrap();
        (graph, a, b, c)
    }

    #[test]
    fn test_add_node_assigns_ids() {
        let mut graph = Graph::new();
        let first = graph.add_node(Node::new("A"));
        let second = graph.add_node(Node::new("B"));

        assert_eq!((first, second), (1, 2));
        assert_eq!(graph.last_node_id(), 2);
    }

    #[test]
    fn test_connect_mirrors_link_on_slots() {
        let (graph, a, b, _) = chain();
        let link = graph.input_link(b, 0).unwrap();

        assert_eq!(link.origin_id, a);
        assert_eq!(graph.node(a).unwrap().outputs[0].links, vec![link.id]);
    }

    #[test]
    fn test_connect_rejects_missing_slot() {
        let (mut graph, a, b, _) = chain();
        let err = graph.connect(a, 3, b, 0).unwrap_err();
        assert!(matches!(err, ScaffoldError::Validation(_)));

        let err = graph.connect(a, 0, 99, 0).unwrap_err();
        assert!(matches!(err, ScaffoldError::NodeNotFound(99)));
    }

    #[test]
    fn test_connect_replaces_existing_input_link() {
        let (mut graph, a, b, c) = chain();
        let old = graph.input_link(c, 0).unwrap().id;
        graph.connect(a, 0, c, 0).unwrap();

        assert!(graph.link(old).is_none());
        assert!(graph.node(b).unwrap().outputs[0].links.is_empty());
        assert_eq!(graph.input_link(c, 0).unwrap().origin_id, a);
    }

    #[test]
    fn test_execution_order_follows_links() {
        let (graph, a, b, c) = chain();
        assert_eq!(graph.compute_execution_order(), vec![a, b, c]);
    }

    #[test]
    fn test_execution_order_appends_cycles() {
        let mut graph = Graph::new();
        let a = graph.add_node(
            Node::new("Loop")
                .with_input("in", "number")
                .with_output("out", "number"),
        );
        let b = graph.add_node(
            Node::new("Loop")
                .with_input("in", "number")
                .with_output("out", "number"),
        );
        let free = graph.add_node(Node::new("Free"));
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, a, 0).unwrap();

        assert_eq!(graph.compute_execution_order(), vec![free, a, b]);
    }

    #[test]
    fn test_remove_node_drops_links() {
        let (mut graph, a, b, c) = chain();
        graph.remove_node(b).unwrap();

        assert_eq!(graph.links().count(), 0);
        assert!(graph.node(a).unwrap().outputs[0].links.is_empty());
        assert_eq!(graph.node(c).unwrap().inputs[0].link, None);
        assert_eq!(graph.node(c).unwrap().id, c);
    }

    #[test]
    fn test_configure_round_trip() {
        let (graph, ..) = chain();
        let snapshot = graph.to_snapshot();

        let mut restored = Graph::new();
        restored
            .configure(&snapshot, &NodeTypeRegistry::new())
            .unwrap();

        assert_eq!(restored.to_snapshot(), snapshot);
    }

    #[test]
    fn test_configure_failure_leaves_graph_untouched() {
        let (graph, ..) = chain();
        let mut snapshot = graph.to_snapshot();
        snapshot.links[0].target_slot = 7;

        let mut existing = Graph::new();
        existing.add_node(Node::new("Keep"));
        let before = existing.clone();

        let err = existing
            .configure(&snapshot, &NodeTypeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, ScaffoldError::Configuration(_)));
        assert_eq!(existing, before);
    }
}
