//! Subcommand implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use neoscaffold_client::{ClientSettings, FileStore, QueueOutcome, Workspace};
use neoscaffold_core::serializer::import;
use neoscaffold_core::{
    compile as compile_graph, serialize, ExtensionRegistry, Graph, HeadlessCanvas,
    InterventionKind, NodeId, Snapshot,
};

/// Read a workflow snapshot from disk.
pub async fn read_workflow(path: &Path) -> Result<Snapshot> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read workflow {}", path.display()))?;
    Snapshot::from_json(&text).with_context(|| format!("Invalid workflow {}", path.display()))
}

async fn read_extensions(path: Option<&Path>) -> Result<ExtensionRegistry> {
    let mut registry = ExtensionRegistry::new();
    if let Some(path) = path {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read extensions {}", path.display()))?;
        let descriptors: Value = serde_json::from_str(&text)?;
        registry.load(&descriptors)?;
    }
    Ok(registry)
}

/// Load a snapshot into a fresh graph without a backend.
fn offline_graph(snapshot: &Snapshot, extensions: &ExtensionRegistry) -> Result<Graph> {
    let mut graph = Graph::new();
    let report = import(&mut graph, extensions, snapshot)?;
    if let Some(notice) = report.missing_types_notice() {
        warn!("{}", notice);
    }
    Ok(graph)
}

pub async fn checksum(workflow: &Path) -> Result<()> {
    let snapshot = read_workflow(workflow).await?;
    let graph = offline_graph(&snapshot, &ExtensionRegistry::new())?;
    println!("{}", serialize(&graph)?.checksum);
    Ok(())
}

pub async fn compile(workflow: &Path, extensions: Option<&Path>) -> Result<()> {
    let snapshot = read_workflow(workflow).await?;
    let registry = read_extensions(extensions).await?;
    let graph = offline_graph(&snapshot, &registry)?;
    let plan = compile_graph(&graph)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Workspace with extensions loaded from the backend and `workflow` imported.
async fn connected_workspace(
    settings: ClientSettings,
    workflow: &Path,
    selection: Vec<NodeId>,
) -> Result<Arc<Workspace>> {
    let store = Arc::new(FileStore::new(settings.state_dir.clone()));
    let canvas = Arc::new(HeadlessCanvas::new().with_selection(selection));
    let workspace = Arc::new(Workspace::new(
        settings,
        store,
        canvas,
        ExtensionRegistry::new(),
    )?);

    if let Err(e) = workspace.load_extensions().await {
        warn!("Failed to load extensions: {}", e);
    }
    let snapshot = read_workflow(workflow).await?;
    workspace.import(&snapshot)?;
    Ok(workspace)
}

pub async fn queue(settings: ClientSettings, workflow: &Path, batch: usize) -> Result<()> {
    let workspace = connected_workspace(settings, workflow, Vec::new()).await?;

    match workspace.queue_prompt(batch).await? {
        QueueOutcome::Deferred { queued } => {
            info!("Queued {} plan(s) behind a running dispatch", queued.len());
        }
        QueueOutcome::Dispatched(report) => {
            for (id, response) in &report.responses {
                println!("{}\t{}", id, response);
            }
            if let Some(failed) = report.failed {
                bail!(
                    "Dispatch of {} failed; {} plan(s) left pending",
                    failed.id,
                    report.remaining
                );
            }
        }
    }
    Ok(())
}

pub async fn intervene(
    settings: ClientSettings,
    kind: InterventionKind,
    workflow: &Path,
    nodes: Vec<NodeId>,
    all: bool,
) -> Result<()> {
    if !all && nodes.is_empty() {
        bail!("Pass --nodes or --all");
    }
    let workspace = connected_workspace(settings, workflow, nodes).await?;
    let response = workspace.toggle_intervention(kind, all).await?;
    println!("{}", response);
    Ok(())
}

pub async fn step(settings: ClientSettings, workflow: &Path, nodes: Vec<NodeId>) -> Result<()> {
    let workspace = connected_workspace(settings, workflow, nodes).await?;
    let response = workspace.step_through().await?;
    println!("{}", response);
    Ok(())
}

pub async fn watch(settings: ClientSettings, workflow: Option<&Path>) -> Result<()> {
    let store = Arc::new(FileStore::new(settings.state_dir.clone()));
    let workspace = Arc::new(Workspace::new(
        settings,
        store,
        Arc::new(HeadlessCanvas::new()),
        ExtensionRegistry::new(),
    )?);

    workspace.start().await;
    if let Some(path) = workflow {
        let snapshot = read_workflow(path).await?;
        workspace.import(&snapshot)?;
    }
    info!("Watching {}; press Ctrl-C to stop", workspace.channel().url());

    tokio::signal::ctrl_c().await?;
    workspace.shutdown().await;
    Ok(())
}
