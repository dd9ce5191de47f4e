//! Realtime execution updates
//!
//! The backend streams `{type, data}` frames while a plan runs. Each frame
//! is applied to the graph in a fixed priority order:
//!
//! 1. `breakpoint`: highlight, centre and select the node, then pause.
//! 2. Any other frame clears the paused flag.
//! 3. `node_errors`: attach errors to the evaluating node and mark it red.
//! 4. `evaluation_action`: record the action and stamp the start time.
//! 5. `results`: store each result on its node and restore its colours.
//!
//! Steps 1 and 3 end processing when their node exists. Every frame ends
//! with a redraw request.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::canvas::CanvasHost;
use crate::error::Result;
use crate::graph::{palette, Graph, NodeId};

/// Frame received on the realtime channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type", default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub data: Option<UpdateData>,
}

/// Payload of a realtime frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateData {
    #[serde(default)]
    pub breakpoint: Option<Value>,
    #[serde(default)]
    pub node_errors: Option<Value>,
    #[serde(default)]
    pub evaluation_action: Option<Value>,
    #[serde(default)]
    pub results: Option<Map<String, Value>>,
    #[serde(default)]
    pub prompt_id: Option<Value>,
    #[serde(default)]
    pub number: Option<Value>,
}

/// What a frame did to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Execution paused at this node.
    Paused(NodeId),
    /// This node reported errors.
    Errored(NodeId),
    /// Evaluation progress and results were recorded.
    Updated {
        evaluating: Option<NodeId>,
        results: Vec<NodeId>,
    },
    /// The frame carried no data.
    Ignored,
}

/// Accepts numeric ids and numeric strings.
fn node_id_of(value: &Value) -> Option<NodeId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map_or(true, |v| v != 0.0),
        Value::Bool(true) => true,
    }
}

fn action_node(action: Option<&Value>) -> Option<NodeId> {
    action.and_then(|action| action.get("node_id")).and_then(node_id_of)
}

fn timestamp() -> String {
    Local::now().format("%m/%d/%y, %I:%M:%S%.3f %p").to_string()
}

/// Parse a text frame and apply it.
pub fn apply_frame(
    graph: &mut Graph,
    canvas: &dyn CanvasHost,
    paused: &AtomicBool,
    frame: &str,
) -> Result<UpdateOutcome> {
    let message: RealtimeMessage = serde_json::from_str(frame)?;
    Ok(apply_update(graph, canvas, paused, &message))
}

/// Apply a realtime frame to the graph.
pub fn apply_update(
    graph: &mut Graph,
    canvas: &dyn CanvasHost,
    paused: &AtomicBool,
    message: &RealtimeMessage,
) -> UpdateOutcome {
    let outcome = match &message.data {
        Some(data) => apply_data(graph, canvas, paused, data),
        None => UpdateOutcome::Ignored,
    };
    canvas.set_dirty();
    outcome
}

fn apply_data(
    graph: &mut Graph,
    canvas: &dyn CanvasHost,
    paused: &AtomicBool,
    data: &UpdateData,
) -> UpdateOutcome {
    if let Some(id) = data.breakpoint.as_ref().filter(|v| is_present(v)).and_then(node_id_of) {
        if let Some(node) = graph.node_mut(id) {
            node.store_and_switch_colors(palette::PAUSED_COLOR, palette::PAUSED_COLOR);
            canvas.center_on_node(id);
            canvas.select_node(id);
            paused.store(true, Ordering::SeqCst);
            debug!(node = id, "paused at breakpoint");
            return UpdateOutcome::Paused(id);
        }
        warn!(node = id, "breakpoint reported for unknown node");
    }
    paused.store(false, Ordering::SeqCst);

    let action_id = action_node(data.evaluation_action.as_ref());

    if let Some(errors) = data.node_errors.as_ref().filter(|v| is_present(v)) {
        if let Some(node) = action_id.and_then(|id| graph.node_mut(id)) {
            let id = node.id;
            node.properties
                .insert("node_errors".to_string(), errors.clone());
            node.store_and_switch_colors(palette::ERROR_COLOR, palette::ERROR_COLOR);
            canvas.center_on_node(id);
            canvas.select_node(id);
            warn!(node = id, "node reported errors");
            return UpdateOutcome::Errored(id);
        }
    }

    let mut evaluating = None;
    if let (Some(action), Some(node)) = (
        data.evaluation_action.as_ref(),
        action_id.and_then(|id| graph.node_mut(id)),
    ) {
        node.properties
            .insert("evaluation_action".to_string(), action.clone());
        let result = node
            .properties
            .entry("result".to_string())
            .or_insert_with(|| json!({}));
        if !result.is_object() {
            *result = json!({});
        }
        if let Some(result) = result.as_object_mut() {
            result.insert("timestamp".to_string(), Value::String(timestamp()));
        }
        node.store_and_switch_colors(
            palette::NODE_BOX_OUTLINE_COLOR,
            palette::NODE_BOX_OUTLINE_COLOR,
        );
        evaluating = Some(node.id);
    }

    let mut results = Vec::new();
    if let Some(entries) = &data.results {
        for (key, result) in entries {
            if !is_present(result) {
                continue;
            }
            let id = result
                .get("node_id")
                .and_then(node_id_of)
                .or_else(|| key.parse().ok());
            let Some(node) = id.and_then(|id| graph.node_mut(id)) else {
                debug!(key = %key, "result for unknown node");
                continue;
            };

            let previous_timestamp = node
                .properties
                .get("result")
                .and_then(|r| r.get("timestamp"))
                .cloned();
            let mut stored = Map::new();
            stored.insert(
                "prompt_id".to_string(),
                data.prompt_id.clone().unwrap_or(Value::Null),
            );
            stored.insert("result".to_string(), result.clone());
            if let Some(ts) = previous_timestamp {
                stored.insert("timestamp".to_string(), ts);
            }
            node.properties
                .insert("result".to_string(), Value::Object(stored));
            node.properties.remove("node_errors");
            node.restore_colors(false);
            results.push(node.id);
        }
    }

    UpdateOutcome::Updated { evaluating, results }
}
