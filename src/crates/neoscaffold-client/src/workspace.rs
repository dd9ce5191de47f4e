//! Client workspace
//!
//! Owns one graph together with everything attached to it: the extension
//! registry, the paused flag, the dispatch queue, intervention state, the
//! realtime channel and the background tasks (autosave and socket health).
//! Tasks are started by [`Workspace::start`] and torn down by
//! [`Workspace::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use neoscaffold_core::realtime::apply_frame;
use neoscaffold_core::serializer::import;
use neoscaffold_core::{
    compile, serialize, CanvasHost, ExecutionPlan, ExtensionRegistry, Graph, ImportReport,
    InterventionKind, ScaffoldError, Snapshot,
};

use crate::config::ClientSettings;
use crate::error::Result;
use crate::http::ApiClient;
use crate::interventions::InterventionController;
use crate::queue::{QueueManager, QueueOutcome};
use crate::session::StoredSession;
use crate::socket::{FrameSink, RealtimeChannel};
use crate::storage::{KeyValueStore, WORKFLOW_KEY};

const DEFAULT_WORKFLOW: &str = include_str!("../resources/default_workflow.json");

/// Starter workflow shipped with the client.
pub fn default_workflow() -> Result<Snapshot> {
    Ok(Snapshot::from_json(DEFAULT_WORKFLOW)?)
}

/// Applies realtime frames to the shared graph.
struct GraphUpdater {
    graph: Arc<RwLock<Graph>>,
    canvas: Arc<dyn CanvasHost>,
    paused: Arc<AtomicBool>,
}

impl FrameSink for GraphUpdater {
    fn handle_frame(&self, frame: &str) {
        let mut graph = self.graph.write();
        match apply_frame(&mut graph, self.canvas.as_ref(), &self.paused, frame) {
            Ok(outcome) => debug!(?outcome, "applied realtime frame"),
            Err(e) => warn!("Ignoring malformed realtime frame: {}", e),
        }
    }
}

/// Result of the primary action.
#[derive(Debug)]
pub enum PrimaryAction {
    /// Paused nodes were released for one step.
    Stepped(Value),
    /// A plan was queued.
    Queued(QueueOutcome),
}

/// One graph and its connection to the backend.
pub struct Workspace {
    settings: ClientSettings,
    graph: Arc<RwLock<Graph>>,
    extensions: RwLock<ExtensionRegistry>,
    canvas: Arc<dyn CanvasHost>,
    paused: Arc<AtomicBool>,
    session: Arc<StoredSession>,
    api: Arc<ApiClient>,
    queue: QueueManager,
    interventions: InterventionController,
    channel: Arc<RealtimeChannel>,
    store: Arc<dyn KeyValueStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Workspace {
    pub fn new(
        settings: ClientSettings,
        store: Arc<dyn KeyValueStore>,
        canvas: Arc<dyn CanvasHost>,
        extensions: ExtensionRegistry,
    ) -> Result<Self> {
        let graph = Arc::new(RwLock::new(Graph::new()));
        let paused = Arc::new(AtomicBool::new(false));
        let session = Arc::new(StoredSession::new(
            Arc::clone(&store),
            settings.session_key().map(str::to_string),
        ));
        let api = Arc::new(ApiClient::new(&settings, session.clone())?);
        let sink = Arc::new(GraphUpdater {
            graph: Arc::clone(&graph),
            canvas: Arc::clone(&canvas),
            paused: Arc::clone(&paused),
        });
        let channel = Arc::new(RealtimeChannel::new(&settings, session.clone(), sink));

        Ok(Self {
            settings,
            graph,
            extensions: RwLock::new(extensions),
            canvas,
            paused,
            session,
            api,
            queue: QueueManager::new(),
            interventions: InterventionController::new(),
            channel,
            store,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn graph(&self) -> &Arc<RwLock<Graph>> {
        &self.graph
    }

    pub fn canvas(&self) -> &Arc<dyn CanvasHost> {
        &self.canvas
    }

    pub fn session(&self) -> &Arc<StoredSession> {
        &self.session
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn interventions(&self) -> &InterventionController {
        &self.interventions
    }

    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.channel
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Number of node types currently registered.
    pub fn node_type_count(&self) -> usize {
        self.extensions.read().node_types().len()
    }

    /// Fetch extension descriptors and register their node types.
    pub async fn load_extensions(&self) -> Result<()> {
        let descriptors = self.api.get_extensions().await?;
        self.register_extensions(&descriptors)
    }

    /// Register extension descriptors obtained elsewhere.
    pub fn register_extensions(&self, descriptors: &Value) -> Result<()> {
        let mut extensions = self.extensions.write();
        extensions.load(descriptors)?;
        info!(types = extensions.node_types().len(), "registered node types");
        Ok(())
    }

    /// Replace the graph with a snapshot.
    ///
    /// Missing node types are reported to the user in one notice. On a
    /// configuration error the current graph is kept.
    pub fn import(&self, snapshot: &Snapshot) -> Result<ImportReport> {
        let report = {
            let extensions = self.extensions.read();
            let mut graph = self.graph.write();
            import(&mut graph, &extensions, snapshot)?
        };
        if let Some(notice) = report.missing_types_notice() {
            self.canvas.notify(&notice);
        }
        self.canvas.set_dirty();
        Ok(report)
    }

    /// Snapshot of the current graph, taken from a copy.
    pub fn export(&self) -> Result<Snapshot> {
        let graph = self.graph.read().clone();
        Ok(serialize(&graph)?)
    }

    /// Compile the current graph.
    pub fn compile(&self) -> Result<ExecutionPlan> {
        let graph = self.graph.read().clone();
        Ok(compile(&graph)?)
    }

    /// Store the current snapshot under the workflow key.
    pub async fn autosave(&self) -> Result<()> {
        let json = self.export()?.to_json()?;
        self.store.set(WORKFLOW_KEY, &json).await
    }

    /// Load the autosaved workflow, or the starter workflow when there is
    /// none or it cannot be loaded.
    pub async fn restore_workflow(&self) -> ImportReport {
        match self.load_saved_workflow().await {
            Ok(report) => report,
            Err(e) => {
                self.canvas
                    .notify(&format!("Loading default workflow due to: {}", e));
                error!("Error loading previous workflow: {}", e);
                self.load_default_workflow()
            }
        }
    }

    /// Replace the graph with the starter workflow.
    pub fn load_default_workflow(&self) -> ImportReport {
        match default_workflow().and_then(|snapshot| self.import(&snapshot)) {
            Ok(report) => report,
            Err(e) => {
                error!("Failed to load default workflow: {}", e);
                self.graph.write().clear();
                self.canvas.set_dirty();
                ImportReport::default()
            }
        }
    }

    async fn load_saved_workflow(&self) -> Result<ImportReport> {
        let saved = self
            .store
            .get(WORKFLOW_KEY)
            .await?
            .ok_or_else(|| ScaffoldError::Configuration("no saved workflow".to_string()))?;
        let snapshot = Snapshot::from_json(&saved)?;
        self.import(&snapshot)
    }

    /// Compile the graph and queue `batch_size` copies.
    pub async fn queue_prompt(&self, batch_size: usize) -> Result<QueueOutcome> {
        let plan = self.compile()?;
        self.queue
            .enqueue(&plan, batch_size, self.api.as_ref())
            .await
    }

    /// Toggle an intervention for the selection, or globally with `all`.
    pub async fn toggle_intervention(&self, kind: InterventionKind, all: bool) -> Result<Value> {
        self.interventions
            .toggle(kind, &self.graph, self.canvas.as_ref(), all, self.api.as_ref())
            .await
    }

    /// Release the selected paused nodes for one step.
    pub async fn step_through(&self) -> Result<Value> {
        self.interventions
            .step_through(&self.graph, self.canvas.as_ref(), self.api.as_ref())
            .await
    }

    /// Step through when paused, otherwise queue one plan.
    pub async fn primary_action(&self) -> Result<PrimaryAction> {
        if self.is_paused() {
            Ok(PrimaryAction::Stepped(self.step_through().await?))
        } else {
            Ok(PrimaryAction::Queued(self.queue_prompt(1).await?))
        }
    }

    /// Load extensions, restore the saved workflow, connect the socket and
    /// start the background tasks.
    pub async fn start(self: &Arc<Self>) {
        if let Err(e) = self.load_extensions().await {
            error!("Failed to load extensions: {}", e);
        }
        self.restore_workflow().await;

        if let Err(e) = self.channel.connect().await {
            warn!("Initial WebSocket connection failed: {}", e);
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_autosave(self.settings.autosave_interval()));
        tasks.push(
            self.channel
                .spawn_health_monitor(self.settings.reconnect_interval()),
        );
    }

    fn spawn_autosave(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let workspace = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = workspace.autosave().await {
                    warn!("Autosave failed: {}", e);
                }
            }
        })
    }

    /// Stop background tasks, close the socket and save once more.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.channel.close().await;
        if let Err(e) = self.autosave().await {
            warn!("Final autosave failed: {}", e);
        }
        info!("workspace shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use neoscaffold_core::graph::{Node, Widget};
    use neoscaffold_core::HeadlessCanvas;
    use serde_json::json;

    fn workspace(store: Arc<MemoryStore>, canvas: Arc<HeadlessCanvas>) -> Workspace {
        Workspace::new(
            ClientSettings::new("http://127.0.0.1:9"),
            store,
            canvas,
            ExtensionRegistry::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_autosave_and_restore() {
        let store = Arc::new(MemoryStore::new());
        let first = workspace(store.clone(), Arc::new(HeadlessCanvas::new()));
        first
            .graph()
            .write()
            .add_node(Node::new("Constant").with_widget(Widget::new("value", "number", json!(2))));
        first.autosave().await.unwrap();

        let canvas = Arc::new(HeadlessCanvas::new());
        let second = workspace(store, canvas.clone());
        let report = second.restore_workflow().await;

        assert_eq!(report.missing_types, vec!["Constant"]);
        assert_eq!(second.graph().read().len(), 1);
        assert_eq!(second.export().unwrap().checksum, first.export().unwrap().checksum);
        assert_eq!(canvas.notices(), vec!["Missing node types: Constant".to_string()]);
    }

    #[tokio::test]
    async fn test_restore_without_saved_workflow() {
        let canvas = Arc::new(HeadlessCanvas::new());
        let ws = workspace(Arc::new(MemoryStore::new()), canvas.clone());

        let report = ws.restore_workflow().await;

        assert!(report.missing_types.contains(&"WhileLoop".to_string()));
        assert_eq!(ws.graph().read().len(), 20);
        assert!(canvas.notices()[0].starts_with("Loading default workflow due to:"));
        assert!(canvas.notices()[1].starts_with("Missing node types:"));
    }

    #[test]
    fn test_default_workflow_keeps_its_checksum() {
        let snapshot = default_workflow().unwrap();
        let mut graph = Graph::new();
        import(&mut graph, &ExtensionRegistry::new(), &snapshot).unwrap();

        let exported = serialize(&graph).unwrap();
        assert_eq!(exported.checksum, snapshot.checksum);
        assert_eq!(exported.checksum, "L4y6vAh5cQxZmBgtkS445UEYWSJ5CF6yosZ/LMdwlEY=");
        assert_eq!(exported.other.get("version"), Some(&json!(0.4)));

        let agent = graph.node(15).unwrap();
        let values = serde_json::to_value(neoscaffold_core::serializer::SerializedNode::from(agent))
            .unwrap();
        assert_eq!(values["widgets_values"][0], json!(""));
    }

    #[tokio::test]
    async fn test_frames_update_paused_flag() {
        let canvas = Arc::new(HeadlessCanvas::new());
        let ws = workspace(Arc::new(MemoryStore::new()), canvas.clone());
        let id = ws.graph().write().add_node(Node::new("A"));
        let updater = GraphUpdater {
            graph: Arc::clone(ws.graph()),
            canvas: canvas.clone(),
            paused: Arc::clone(&ws.paused),
        };

        updater.handle_frame(&format!(r#"{{"data":{{"breakpoint":{}}}}}"#, id));
        assert!(ws.is_paused());
        assert_eq!(canvas.centered(), Some(id));

        updater.handle_frame("not json");
        assert!(ws.is_paused());

        updater.handle_frame(r#"{"data":{"evaluation_action":{"node_id":1}}}"#);
        assert!(!ws.is_paused());
    }
}
