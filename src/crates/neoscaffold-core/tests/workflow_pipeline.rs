// End-to-end: extension descriptors -> imported workflow -> execution plan

use neoscaffold_core::compiler::compile;
use neoscaffold_core::registry::ExtensionRegistry;
use neoscaffold_core::serializer::{import, serialize, Snapshot};
use neoscaffold_core::Graph;
use serde_json::json;

fn extensions() -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new();
    registry
        .load(&json!({
            "core": {
                "name": "core",
                "version": "0.1.0",
                "nodes": {
                    "Number": {
                        "javascript_class_name": "NumberNode",
                        "display_name": "Number",
                        "input": {
                            "required_inputs": {
                                "value": {"name": "value", "kind": "number",
                                          "widget": {"kind": "number", "name": "value", "default": 0}}
                            }
                        },
                        "output": {"name": "value", "kind": "number"}
                    },
                    "Sum": {
                        "javascript_class_name": "SumNode",
                        "display_name": "Sum",
                        "input": {
                            "required_inputs": {
                                "a": {"name": "a", "kind": "number",
                                      "widget": {"kind": "number", "name": "a", "default": 0}},
                                "b": {"name": "b", "kind": "number",
                                      "widget": {"kind": "number", "name": "b", "default": 0}}
                            }
                        },
                        "output": {"name": "total", "kind": "number"}
                    }
                }
            }
        }))
        .unwrap();
    registry
}

const WORKFLOW: &str = r#"{
    "last_node_id": 3,
    "last_link_id": 1,
    "nodes": [
        {"id": 2, "type": "SumNode", "title": "Sum 'it'", "mode": 0,
         "pos": [300, 100], "size": [200, 80],
         "inputs": [
            {"name": "in_rules", "type": "rule_group", "link": null},
            {"name": "out_rules", "type": "rule_group", "link": null},
            {"name": "a", "type": "number", "link": 1},
            {"name": "b", "type": "number", "link": null}
         ],
         "outputs": [{"name": "total", "type": "number", "links": null}],
         "widgets_values": [0, 5, null]},
        {"id": 1, "type": "NumberNode", "mode": 0, "pos": [50, 100],
         "inputs": [
            {"name": "in_rules", "type": "rule_group", "link": null},
            {"name": "out_rules", "type": "rule_group", "link": null},
            {"name": "value", "type": "number", "link": null}
         ],
         "outputs": [{"name": "value", "type": "number", "links": [1]}],
         "widgets_values": [7, null]},
        {"id": 3, "type": "RemovedNode", "mode": 2}
    ],
    "links": [[1, 1, 0, 2, 2, "number"]],
    "groups": [],
    "config": {},
    "extra": {},
    "NeoScaffoldVersion": 0.1
}"#;

#[test]
fn test_import_then_compile() {
    let registry = extensions();
    let snapshot = Snapshot::from_json(WORKFLOW).unwrap();

    let mut graph = Graph::new();
    let report = import(&mut graph, &registry, &snapshot).unwrap();
    assert_eq!(report.missing_types, vec!["RemovedNode".to_string()]);

    let plan = compile(&graph).unwrap();

    assert_eq!(plan.prompt.len(), 2);
    assert_eq!(plan.prompt[&1].inputs["value"], json!(7));
    assert_eq!(plan.prompt[&1].name, "Number");
    assert_eq!(plan.prompt[&2].inputs["a"], json!({"originId": "1"}));
    assert_eq!(plan.prompt[&2].inputs["b"], json!(5));
    assert_eq!(plan.prompt[&2].name, "Sum it");
    assert_eq!(plan.prompt[&2].node_type, "SumNode");
}

#[test]
fn test_export_round_trip_preserves_checksum_and_layout() {
    let registry = extensions();
    let snapshot = Snapshot::from_json(WORKFLOW).unwrap();

    let mut graph = Graph::new();
    import(&mut graph, &registry, &snapshot).unwrap();
    let exported = serialize(&graph).unwrap();

    let mut reloaded = Graph::new();
    import(&mut reloaded, &registry, &exported).unwrap();
    let again = serialize(&reloaded).unwrap();

    assert_eq!(again.checksum, exported.checksum);
    assert_eq!(again.nodes[0].layout["pos"], json!([50, 100]));
    assert_eq!(again.nodes[1].widgets_values, vec![json!(0), json!(5), json!(null)]);
}

#[test]
fn test_plan_wire_format() {
    let registry = extensions();
    let snapshot = Snapshot::from_json(WORKFLOW).unwrap();
    let mut graph = Graph::new();
    import(&mut graph, &registry, &snapshot).unwrap();

    let mut plan = compile(&graph).unwrap();
    plan.prompt_id = Some("-NtestPromptId000000".to_string());
    let wire = serde_json::to_value(&plan).unwrap();

    assert_eq!(wire["promptId"], json!("-NtestPromptId000000"));
    assert_eq!(wire["workflow"]["checksum"], json!(plan.workflow.checksum));
    assert_eq!(wire["prompt"]["2"]["type"], json!("SumNode"));
    assert_eq!(wire["workflow"]["links"][0], json!([1, 1, 0, 2, 2, "number"]));
}
