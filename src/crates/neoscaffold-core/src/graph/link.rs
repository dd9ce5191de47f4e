//! Directed connections between node slots

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{LinkId, NodeId};

/// A connection from an output slot to an input slot.
///
/// Serialized as the array `[id, origin_id, origin_slot, target_id, target_slot, type]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "LinkTuple", into = "LinkTuple")]
pub struct Link {
    pub id: LinkId,
    pub origin_id: NodeId,
    pub origin_slot: usize,
    pub target_id: NodeId,
    pub target_slot: usize,
    pub data_type: Value,
}

#[derive(Serialize, Deserialize)]
struct LinkTuple(LinkId, NodeId, usize, NodeId, usize, Value);

impl From<LinkTuple> for Link {
    fn from(LinkTuple(id, origin_id, origin_slot, target_id, target_slot, data_type): LinkTuple) -> Self {
        Self {
            id,
            origin_id,
            origin_slot,
            target_id,
            target_slot,
            data_type,
        }
    }
}

impl From<Link> for LinkTuple {
    fn from(link: Link) -> Self {
        LinkTuple(
            link.id,
            link.origin_id,
            link.origin_slot,
            link.target_id,
            link.target_slot,
            link.data_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_wire_format_is_tuple() {
        let link = Link {
            id: 3,
            origin_id: 1,
            origin_slot: 0,
            target_id: 2,
            target_slot: 1,
            data_type: Value::String("number".to_string()),
        };

        let json = serde_json::to_string(&link).unwrap();
        assert_eq!(json, r#"[3,1,0,2,1,"number"]"#);

        let parsed: Link = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, link);
    }
}
