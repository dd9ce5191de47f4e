//! Runtime intervention state
//!
//! Breakpoints, stop points and restart points are tracked per workflow
//! checksum, so toggles made on one workflow never leak into another.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::graph::NodeId;

/// Kind of runtime intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterventionKind {
    Breakpoint,
    Stop,
    Restart,
}

impl InterventionKind {
    pub const ALL: [InterventionKind; 3] = [
        InterventionKind::Breakpoint,
        InterventionKind::Stop,
        InterventionKind::Restart,
    ];

    /// Backend path that receives toggles of this kind.
    pub fn endpoint(self) -> &'static str {
        match self {
            InterventionKind::Breakpoint => "/interventions/breakpoints",
            InterventionKind::Stop => "/interventions/stop-points",
            InterventionKind::Restart => "/interventions/restart-points",
        }
    }

    /// Request field carrying the "apply to all nodes" flag.
    pub fn all_flag(self) -> &'static str {
        match self {
            InterventionKind::Breakpoint => "all_break",
            InterventionKind::Stop => "all_stop",
            InterventionKind::Restart => "all_restart",
        }
    }

    /// Colour pair applied to a node while the intervention is set.
    pub fn colors(self) -> (&'static str, &'static str) {
        match self {
            InterventionKind::Breakpoint => ("#141414", "#141414"),
            InterventionKind::Stop => ("#3d1414", "#3d1414"),
            InterventionKind::Restart => ("#14283d", "#14283d"),
        }
    }
}

impl fmt::Display for InterventionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterventionKind::Breakpoint => "breakpoint",
            InterventionKind::Stop => "stop",
            InterventionKind::Restart => "restart",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for InterventionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "breakpoint" | "break" => Ok(InterventionKind::Breakpoint),
            "stop" => Ok(InterventionKind::Stop),
            "restart" => Ok(InterventionKind::Restart),
            other => Err(format!("unknown intervention kind: {}", other)),
        }
    }
}

/// Node ids with an intervention set, per kind and workflow checksum.
#[derive(Debug, Clone, Default)]
pub struct InterventionSets {
    sets: HashMap<(InterventionKind, String), BTreeSet<NodeId>>,
}

impl InterventionSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of a node. Returns `true` when the node is now set.
    pub fn toggle(&mut self, kind: InterventionKind, checksum: &str, node_id: NodeId) -> bool {
        let set = self
            .sets
            .entry((kind, checksum.to_string()))
            .or_default();
        if set.remove(&node_id) {
            false
        } else {
            set.insert(node_id);
            true
        }
    }

    pub fn contains(&self, kind: InterventionKind, checksum: &str, node_id: NodeId) -> bool {
        self.sets
            .get(&(kind, checksum.to_string()))
            .map_or(false, |set| set.contains(&node_id))
    }

    /// Ids currently set for a workflow, ascending, as sent to the backend.
    pub fn node_ids(&self, kind: InterventionKind, checksum: &str) -> Vec<String> {
        self.sets
            .get(&(kind, checksum.to_string()))
            .map(|set| set.iter().map(|id| id.to_string()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_twice_restores_state() {
        let mut sets = InterventionSets::new();

        assert!(sets.toggle(InterventionKind::Breakpoint, "abc", 4));
        assert!(sets.contains(InterventionKind::Breakpoint, "abc", 4));
        assert!(!sets.toggle(InterventionKind::Breakpoint, "abc", 4));
        assert!(sets.node_ids(InterventionKind::Breakpoint, "abc").is_empty());
    }

    #[test]
    fn test_sets_are_scoped_by_checksum_and_kind() {
        let mut sets = InterventionSets::new();
        sets.toggle(InterventionKind::Breakpoint, "abc", 4);
        sets.toggle(InterventionKind::Breakpoint, "abc", 12);

        assert_eq!(sets.node_ids(InterventionKind::Breakpoint, "abc"), vec!["4", "12"]);
        assert!(sets.node_ids(InterventionKind::Breakpoint, "def").is_empty());
        assert!(sets.node_ids(InterventionKind::Stop, "abc").is_empty());
    }

    #[test]
    fn test_kind_metadata() {
        assert_eq!(InterventionKind::Stop.endpoint(), "/interventions/stop-points");
        assert_eq!(InterventionKind::Restart.all_flag(), "all_restart");
        assert_eq!("breakpoint".parse::<InterventionKind>(), Ok(InterventionKind::Breakpoint));
        assert!("pause".parse::<InterventionKind>().is_err());
    }
}
