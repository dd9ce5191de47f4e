//! Canvas host contract
//!
//! Rendering lives outside this crate. Everything the core needs from the
//! editor surface goes through [`CanvasHost`].

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::graph::NodeId;

/// Editor surface the core drives.
pub trait CanvasHost: Send + Sync {
    /// Scroll the view so the node is visible.
    fn center_on_node(&self, node_id: NodeId);

    /// Add a node to the selection.
    fn select_node(&self, node_id: NodeId);

    /// Currently selected node ids.
    fn selected_nodes(&self) -> Vec<NodeId>;

    fn clear_selection(&self);

    /// Request a redraw.
    fn set_dirty(&self);

    /// Show a user-visible notice.
    fn notify(&self, message: &str);
}

#[derive(Debug, Default)]
struct HeadlessState {
    selected: BTreeSet<NodeId>,
    centered: Option<NodeId>,
    redraws: usize,
    notices: Vec<String>,
}

/// Canvas host without a display. Keeps the selection in memory and
/// logs notices.
#[derive(Debug, Default)]
pub struct HeadlessCanvas {
    state: Mutex<HeadlessState>,
}

impl HeadlessCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given nodes selected.
    pub fn with_selection(self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.state.lock().selected.extend(ids);
        self
    }

    pub fn centered(&self) -> Option<NodeId> {
        self.state.lock().centered
    }

    pub fn redraws(&self) -> usize {
        self.state.lock().redraws
    }

    pub fn notices(&self) -> Vec<String> {
        self.state.lock().notices.clone()
    }
}

impl CanvasHost for HeadlessCanvas {
    fn center_on_node(&self, node_id: NodeId) {
        self.state.lock().centered = Some(node_id);
    }

    fn select_node(&self, node_id: NodeId) {
        self.state.lock().selected.insert(node_id);
    }

    fn selected_nodes(&self) -> Vec<NodeId> {
        self.state.lock().selected.iter().copied().collect()
    }

    fn clear_selection(&self) {
        self.state.lock().selected.clear();
    }

    fn set_dirty(&self) {
        self.state.lock().redraws += 1;
        debug!("canvas marked dirty");
    }

    fn notify(&self, message: &str) {
        warn!("{}", message);
        self.state.lock().notices.push(message.to_string());
    }
}
