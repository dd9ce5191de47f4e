//! Nodes, slots and widgets

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{LinkId, NodeId};

/// Colours used when nodes are recoloured by runtime state.
pub mod palette {
    /// Default node title colour.
    pub const NODE_DEFAULT_COLOR: &str = "#333";
    /// Default node body colour.
    pub const NODE_DEFAULT_BGCOLOR: &str = "#353535";
    /// Outline used while a node is being evaluated.
    pub const NODE_BOX_OUTLINE_COLOR: &str = "#FFF";
    /// Node halted at a breakpoint.
    pub const PAUSED_COLOR: &str = "#2a363b";
    /// Node reported an execution error.
    pub const ERROR_COLOR: &str = "#FF0000";
}

/// Execution mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    #[default]
    Always,
    OnEvent,
    /// Never executed; excluded from compiled plans.
    Never,
    OnTrigger,
    Bypass,
}

impl NodeMode {
    /// Numeric value used in serialized graphs.
    pub fn as_u8(self) -> u8 {
        match self {
            NodeMode::Always => 0,
            NodeMode::OnEvent => 1,
            NodeMode::Never => 2,
            NodeMode::OnTrigger => 3,
            NodeMode::Bypass => 4,
        }
    }
}

impl From<u8> for NodeMode {
    fn from(value: u8) -> Self {
        match value {
            1 => NodeMode::OnEvent,
            2 => NodeMode::Never,
            3 => NodeMode::OnTrigger,
            4 => NodeMode::Bypass,
            _ => NodeMode::Always,
        }
    }
}

/// Input slot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub slot_type: Value,
    /// Link currently feeding this slot.
    #[serde(default)]
    pub link: Option<LinkId>,
    /// Layout fields carried through unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputSlot {
    pub fn new(name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_type: Value::String(slot_type.into()),
            link: None,
            extra: Map::new(),
        }
    }
}

/// Output slot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub slot_type: Value,
    /// Outgoing links in connection order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub links: Vec<LinkId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutputSlot {
    pub fn new(name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_type: Value::String(slot_type.into()),
            links: Vec::new(),
            extra: Map::new(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<LinkId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<LinkId>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Named literal input edited in place on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub name: String,
    /// Widget kind from the node descriptor ("number", "text", "combo", ...).
    pub kind: String,
    pub value: Value,
    /// Whether the value is sent to the backend when compiled.
    pub serialize: bool,
}

impl Widget {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            value,
            serialize: true,
        }
    }

    /// Mark the widget as display-only.
    pub fn display_only(mut self) -> Self {
        self.serialize = false;
        self
    }
}

/// A node in the editing graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Key into the node type registry.
    pub node_type: String,
    pub title: String,
    pub mode: NodeMode,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<OutputSlot>,
    pub widgets: Vec<Widget>,
    /// Free-form properties; also carries `result`, `node_errors` and
    /// `evaluation_action` reported by the backend.
    pub properties: Map<String, Value>,
    pub color: Option<String>,
    pub bgcolor: Option<String>,
    /// Serialized fields the model does not interpret (`pos`, `size`, `flags`, ...).
    pub layout: Map<String, Value>,
    /// Serialized widget values with no widget to receive them.
    pub(crate) unbound_widget_values: Vec<Value>,
    original_colors: Option<(String, String)>,
}

impl Node {
    /// Create a bare node; the graph assigns the id when it is added.
    pub fn new(node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: 0,
            title: node_type.clone(),
            node_type,
            mode: NodeMode::Always,
            inputs: Vec::new(),
            outputs: Vec::new(),
            widgets: Vec::new(),
            properties: Map::new(),
            color: None,
            bgcolor: None,
            layout: Map::new(),
            unbound_widget_values: Vec::new(),
            original_colors: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        self.inputs.push(InputSlot::new(name, slot_type));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        self.outputs.push(OutputSlot::new(name, slot_type));
        self
    }

    pub fn with_widget(mut self, widget: Widget) -> Self {
        self.widgets.push(widget);
        self
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|slot| slot.name == name)
    }

    pub fn widget(&self, name: &str) -> Option<&Widget> {
        self.widgets.iter().find(|widget| widget.name == name)
    }

    pub fn widget_mut(&mut self, name: &str) -> Option<&mut Widget> {
        self.widgets.iter_mut().find(|widget| widget.name == name)
    }

    /// Remember the current colours (once) and switch to a new pair.
    pub fn store_and_switch_colors(&mut self, color: &str, bgcolor: &str) {
        if self.original_colors.is_none() {
            self.original_colors = Some((
                self.color
                    .clone()
                    .unwrap_or_else(|| palette::NODE_DEFAULT_COLOR.to_string()),
                self.bgcolor
                    .clone()
                    .unwrap_or_else(|| palette::NODE_DEFAULT_BGCOLOR.to_string()),
            ));
        }
        self.color = Some(color.to_string());
        self.bgcolor = Some(bgcolor.to_string());
    }

    /// Restore remembered colours. Any leftover error colour falls back to
    /// the default, and `reset_all` forces both colours to the defaults.
    pub fn restore_colors(&mut self, reset_all: bool) {
        if let Some((color, bgcolor)) = self.original_colors.take() {
            self.color = Some(color);
            self.bgcolor = Some(bgcolor);
        }
        if reset_all || self.color.as_deref() == Some(palette::ERROR_COLOR) {
            self.color = Some(palette::NODE_DEFAULT_COLOR.to_string());
        }
        if reset_all || self.bgcolor.as_deref() == Some(palette::ERROR_COLOR) {
            self.bgcolor = Some(palette::NODE_DEFAULT_BGCOLOR.to_string());
        }
    }

    /// Whether colours have been switched and not yet restored.
    pub fn has_stored_colors(&self) -> bool {
        self.original_colors.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for value in 0..=4u8 {
            assert_eq!(NodeMode::from(value).as_u8(), value);
        }
        assert_eq!(NodeMode::from(9), NodeMode::Always);
    }

    #[test]
    fn test_store_and_restore_colors() {
        let mut node = Node::new("Add");
        node.color = Some("#123".to_string());

        node.store_and_switch_colors("#141414", "#141414");
        node.store_and_switch_colors("#2a363b", "#2a363b");
        assert_eq!(node.color.as_deref(), Some("#2a363b"));

        node.restore_colors(false);
        assert_eq!(node.color.as_deref(), Some("#123"));
        assert_eq!(node.bgcolor.as_deref(), Some(palette::NODE_DEFAULT_BGCOLOR));
        assert!(!node.has_stored_colors());
    }

    #[test]
    fn test_restore_resets_error_color() {
        let mut node = Node::new("Add");
        node.color = Some(palette::ERROR_COLOR.to_string());
        node.bgcolor = Some("#000".to_string());

        node.restore_colors(false);

        assert_eq!(node.color.as_deref(), Some(palette::NODE_DEFAULT_COLOR));
        assert_eq!(node.bgcolor.as_deref(), Some("#000"));
    }

    #[test]
    fn test_output_links_accept_null() {
        let slot: OutputSlot =
            serde_json::from_str(r#"{"name":"out","type":"number","links":null}"#).unwrap();
        assert!(slot.links.is_empty());
    }
}
