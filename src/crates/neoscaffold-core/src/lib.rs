//! # neoscaffold-core
//!
//! Graph model and compilers for the NeoScaffold workflow client.
//!
//! - [`graph`]: editable node graph with dependency ordering
//! - [`serializer`]: snapshots, structural checksums and import
//! - [`compiler`]: execution plans sent to the backend
//! - [`registry`]: node types advertised by backend extensions
//! - [`realtime`]: applying execution updates to the graph
//! - [`interventions`]: breakpoint, stop and restart point state
//! - [`id`]: time-ordered identifiers for queued plans
//!
//! Nothing in this crate performs I/O; transport lives in
//! `neoscaffold-client`.
//!
//! ```rust
//! use neoscaffold_core::compiler::compile;
//! use neoscaffold_core::graph::{Graph, Node, Widget};
//! use serde_json::json;
//!
//! let mut graph = Graph::new();
//! graph.add_node(Node::new("Constant").with_widget(Widget::new("value", "number", json!(3))));
//!
//! let plan = compile(&graph).unwrap();
//! assert_eq!(plan.prompt[&1].inputs["value"], json!(3));
//! ```

pub mod canvas;
pub mod compiler;
pub mod error;
pub mod graph;
pub mod id;
pub mod interventions;
pub mod realtime;
pub mod registry;
pub mod serializer;

pub use canvas::{CanvasHost, HeadlessCanvas};
pub use compiler::{compile, ExecutionPlan, PlanNode};
pub use error::{Result, ScaffoldError};
pub use graph::{Graph, Link, LinkId, Node, NodeId, NodeMode, Widget};
pub use id::IdGenerator;
pub use interventions::{InterventionKind, InterventionSets};
pub use realtime::{RealtimeMessage, UpdateOutcome};
pub use registry::{ExtensionPlugin, ExtensionRegistry, NodeTypeRegistry};
pub use serializer::{serialize, ImportReport, Snapshot};
