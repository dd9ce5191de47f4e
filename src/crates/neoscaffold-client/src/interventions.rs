//! Breakpoint, stop point and restart point controls
//!
//! Toggles flip membership for the selected nodes in the set belonging to
//! the current workflow checksum, recolour those nodes and send the backend
//! the complete resulting id list. The `all` form skips the selection and
//! local state and sends a single global request.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use neoscaffold_core::{serialize, CanvasHost, Graph, InterventionKind, InterventionSets, NodeId};
use neoscaffold_core::ScaffoldError;

use crate::error::Result;
use crate::http::ApiClient;

/// Notice shown when an action needs a selection.
pub const NO_SELECTION_NOTICE: &str = "No nodes selected";

/// Backend side of the intervention controls.
#[async_trait]
pub trait InterventionRelay: Send + Sync {
    async fn toggle_interventions(
        &self,
        kind: InterventionKind,
        workflow_id: &str,
        node_ids: &[String],
        all: bool,
    ) -> Result<Value>;

    async fn step_through(&self, workflow_id: &str, node_ids: &[String]) -> Result<Value>;
}

#[async_trait]
impl InterventionRelay for ApiClient {
    async fn toggle_interventions(
        &self,
        kind: InterventionKind,
        workflow_id: &str,
        node_ids: &[String],
        all: bool,
    ) -> Result<Value> {
        ApiClient::toggle_interventions(self, kind, workflow_id, node_ids, all).await
    }

    async fn step_through(&self, workflow_id: &str, node_ids: &[String]) -> Result<Value> {
        ApiClient::step_through(self, workflow_id, node_ids).await
    }
}

/// Per-workflow intervention state and the actions on it.
#[derive(Debug, Default)]
pub struct InterventionController {
    sets: Mutex<InterventionSets>,
}

impl InterventionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a node currently has an intervention of `kind` for `checksum`.
    pub fn is_set(&self, kind: InterventionKind, checksum: &str, node_id: NodeId) -> bool {
        self.sets.lock().contains(kind, checksum, node_id)
    }

    pub fn node_ids(&self, kind: InterventionKind, checksum: &str) -> Vec<String> {
        self.sets.lock().node_ids(kind, checksum)
    }

    fn require_selection(canvas: &dyn CanvasHost) -> Result<Vec<NodeId>> {
        let selected = canvas.selected_nodes();
        if selected.is_empty() {
            canvas.notify(NO_SELECTION_NOTICE);
            return Err(ScaffoldError::NoSelection.into());
        }
        Ok(selected)
    }

    /// Toggle `kind` for the selected nodes, or for every node with `all`.
    pub async fn toggle(
        &self,
        kind: InterventionKind,
        graph: &RwLock<Graph>,
        canvas: &dyn CanvasHost,
        all: bool,
        relay: &dyn InterventionRelay,
    ) -> Result<Value> {
        let checksum = serialize(&graph.read())?.checksum;

        if all {
            debug!(%kind, "toggling for all nodes");
            return relay.toggle_interventions(kind, &checksum, &[], true).await;
        }

        let selected = Self::require_selection(canvas)?;
        let node_ids = {
            let mut sets = self.sets.lock();
            let mut graph = graph.write();
            let (color, bgcolor) = kind.colors();
            for id in selected {
                let Some(node) = graph.node_mut(id) else {
                    warn!(node = id, "selected node is not in the graph");
                    continue;
                };
                if sets.toggle(kind, &checksum, id) {
                    node.store_and_switch_colors(color, bgcolor);
                } else {
                    node.restore_colors(true);
                }
            }
            sets.node_ids(kind, &checksum)
        };
        canvas.clear_selection();
        canvas.set_dirty();

        relay
            .toggle_interventions(kind, &checksum, &node_ids, false)
            .await
    }

    /// Release the selected paused nodes for one step.
    ///
    /// Colours are left alone; the next realtime frame updates them.
    pub async fn step_through(
        &self,
        graph: &RwLock<Graph>,
        canvas: &dyn CanvasHost,
        relay: &dyn InterventionRelay,
    ) -> Result<Value> {
        let checksum = serialize(&graph.read())?.checksum;
        let selected = Self::require_selection(canvas)?;
        canvas.clear_selection();

        let node_ids: Vec<String> = selected.iter().map(|id| id.to_string()).collect();
        relay.step_through(&checksum, &node_ids).await
    }
}
