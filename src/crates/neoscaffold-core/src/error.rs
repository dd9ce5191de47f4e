//! Error types for graph, snapshot and plan operations
//!
//! ```text
//! ScaffoldError
//! ├── Validation      - Edits that would break graph structure
//! ├── Configuration   - Snapshots that cannot be loaded into a graph
//! ├── Invariant       - Internal invariants (identifier generator)
//! ├── NodeNotFound    - Lookups by id
//! ├── NoSelection     - Interventions without selected nodes
//! └── Serialization   - JSON encode/decode
//! ```

use crate::graph::NodeId;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, ScaffoldError>;

/// Errors raised by the graph model and its compilers.
#[derive(Debug, Error)]
pub enum ScaffoldError {
    /// A structural edit was rejected (missing endpoint, slot out of range).
    #[error("Graph validation error: {0}")]
    Validation(String),

    /// A snapshot could not be configured into a graph.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An internal invariant was violated. Not recoverable.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// No node with the given id exists.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// An intervention toggle was requested with an empty selection.
    #[error("No nodes selected")]
    NoSelection,

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
