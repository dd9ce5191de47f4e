//! Execution plan compiler
//!
//! Walks the graph in dependency order and emits one plan entry per
//! executable node. Literal widget values become inputs by name; inputs fed
//! by a link are replaced by a reference to the producing node. The plan
//! carries the snapshot it was compiled from and a checksum binding the two
//! together.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeMode};
use crate::serializer::{digest_base64, serialize, Snapshot};

/// One node of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Widget literals and `{"originId": "<id>"}` link references by input name.
    pub inputs: Map<String, Value>,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Sanitized node title.
    pub name: String,
}

/// Compiled, content-addressed execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan entries keyed by node id, in ascending numeric order.
    pub prompt: BTreeMap<NodeId, PlanNode>,
    pub workflow: Snapshot,
    pub checksum: String,
    /// Queue item id, stamped when the plan is enqueued.
    #[serde(rename = "promptId", default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

#[derive(Serialize)]
struct PlanChecksumInput<'a> {
    prompt: &'a BTreeMap<NodeId, PlanNode>,
    workflow: &'a str,
}

/// Remove characters that are unsafe in markup: `& < > " ' ` =`.
pub fn sanitize_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '&' | '<' | '>' | '"' | '\'' | '`' | '='))
        .collect()
}

/// Checksum of a plan body together with its workflow checksum.
pub fn plan_checksum(prompt: &BTreeMap<NodeId, PlanNode>, workflow_checksum: &str) -> Result<String> {
    let input = PlanChecksumInput {
        prompt,
        workflow: workflow_checksum,
    };
    Ok(digest_base64(serde_json::to_string(&input)?.as_bytes()))
}

/// Compile the graph into an execution plan.
pub fn compile(graph: &Graph) -> Result<ExecutionPlan> {
    let workflow = serialize(graph)?;
    let mut prompt = BTreeMap::new();

    for id in graph.compute_execution_order() {
        let Some(node) = graph.node(id) else { continue };
        if node.mode == NodeMode::Never {
            debug!(node = id, "skipping node in never mode");
            continue;
        }

        let mut inputs = Map::new();
        for widget in node.widgets.iter().filter(|widget| widget.serialize) {
            inputs.insert(widget.name.clone(), widget.value.clone());
        }
        for (slot, input) in node.inputs.iter().enumerate() {
            if let Some(link) = graph.input_link(id, slot) {
                inputs.insert(
                    input.name.clone(),
                    json!({ "originId": link.origin_id.to_string() }),
                );
            }
        }

        prompt.insert(
            id,
            PlanNode {
                inputs,
                node_type: node.node_type.clone(),
                name: sanitize_name(&node.title),
            },
        );
    }

    let checksum = plan_checksum(&prompt, &workflow.checksum)?;
    debug!(nodes = prompt.len(), %checksum, "compiled execution plan");
    Ok(ExecutionPlan {
        prompt,
        workflow,
        checksum,
        prompt_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, Widget};

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name(r#"<b>"Load" & 'go'`=</b>"#), "bLoad  go/b");
        assert_eq!(sanitize_name("plain name"), "plain name");
    }

    #[test]
    fn test_widgets_and_links_become_inputs() {
        let mut graph = Graph::new();
        let a = graph.add_node(
            Node::new("Constant")
                .with_output("value", "number")
                .with_widget(Widget::new("value", "number", json!(4))),
        );
        let b = graph.add_node(
            Node::new("Add")
                .with_title("Add <two>")
                .with_input("x", "number")
                .with_widget(Widget::new("x", "number", json!(0)))
                .with_widget(Widget::new("y", "number", json!(2)))
                .with_widget(Widget::new("status", "status", Value::Null).display_only()),
        );
        graph.connect(a, 0, b, 0).unwrap();

        let plan = compile(&graph).unwrap();
        let add = &plan.prompt[&2];

        assert_eq!(add.inputs["x"], json!({"originId": "1"}));
        assert_eq!(add.inputs["y"], json!(2));
        assert!(!add.inputs.contains_key("status"));
        assert_eq!(add.name, "Add two");
        assert_eq!(add.node_type, "Add");
        assert_eq!(plan.prompt[&1].inputs["value"], json!(4));
        assert_eq!(plan.workflow.checksum.len(), 44);
        assert!(plan.prompt_id.is_none());
    }

    #[test]
    fn test_never_mode_nodes_are_skipped_but_referenced() {
        let mut graph = Graph::new();
        let a = graph.add_node(
            Node::new("A")
                .with_mode(NodeMode::Never)
                .with_output("out", "number"),
        );
        let b = graph.add_node(Node::new("B").with_input("in", "number"));
        graph.connect(a, 0, b, 0).unwrap();

        let plan = compile(&graph).unwrap();

        assert!(!plan.prompt.contains_key(&1));
        assert_eq!(plan.prompt[&2].inputs["in"], json!({"originId": "1"}));
    }

    #[test]
    fn test_plan_checksum_tracks_widget_values() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("A").with_widget(Widget::new("n", "number", json!(1))));
        let first = compile(&graph).unwrap();

        graph.node_mut(1).unwrap().layout.insert("pos".into(), json!([5, 5]));
        let moved = compile(&graph).unwrap();
        assert_eq!(moved.checksum, first.checksum);

        graph.node_mut(1).unwrap().widget_mut("n").unwrap().value = json!(2);
        let edited = compile(&graph).unwrap();
        assert_ne!(edited.checksum, first.checksum);
        assert_eq!(edited.workflow.checksum, first.workflow.checksum);
    }

    #[test]
    fn test_plan_entries_are_in_numeric_id_order() {
        let mut graph = Graph::new();
        for _ in 0..12 {
            graph.add_node(Node::new("A"));
        }

        let plan = compile(&graph).unwrap();
        let wire = serde_json::to_value(&plan).unwrap();
        let keys: Vec<&str> = wire["prompt"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();

        let expected: Vec<String> = (1..=12).map(|id| id.to_string()).collect();
        assert_eq!(keys, expected);

        let body = serde_json::to_string(&PlanChecksumInput {
            prompt: &plan.prompt,
            workflow: &plan.workflow.checksum,
        })
        .unwrap();
        assert!(body.find(r#""9":"#).unwrap() < body.find(r#""10":"#).unwrap());

        let parsed: ExecutionPlan = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed.prompt.keys().copied().collect::<Vec<_>>(), (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_graph_compiles_to_empty_plan() {
        let plan = compile(&Graph::new()).unwrap();
        assert!(plan.prompt.is_empty());
        assert!(!plan.checksum.is_empty());
    }
}
