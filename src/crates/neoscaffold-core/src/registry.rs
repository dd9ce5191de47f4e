//! Node type registry and backend extensions
//!
//! The backend advertises its node and rule types as declarative
//! descriptors. Each descriptor becomes a [`NodeType`] template that the
//! graph instantiates when a snapshot is configured. Descriptors may carry
//! a client script; it is never evaluated. Hosts that need custom
//! behaviour register an [`ExtensionPlugin`] under the extension's class
//! name instead.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, ScaffoldError};
use crate::graph::{Graph, InputSlot, Node, Widget};
use crate::serializer::Snapshot;

/// Slot type shared by the rule inputs and outputs of every node.
pub const RULE_GROUP: &str = "rule_group";

/// Widget shown for an input.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WidgetDescriptor {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default: Value,
}

/// Input or parameter advertised by a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SlotDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub widget: Option<WidgetDescriptor>,
}

/// Required and optional inputs of a node type, in advertised order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InputGroup {
    #[serde(default, deserialize_with = "ordered_map")]
    pub required_inputs: Vec<(String, SlotDescriptor)>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub optional_inputs: Vec<(String, SlotDescriptor)>,
}

/// Required and optional parameters of a rule type, in advertised order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParameterGroup {
    #[serde(default, deserialize_with = "ordered_map")]
    pub required_parameters: Vec<(String, SlotDescriptor)>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub optional_parameters: Vec<(String, SlotDescriptor)>,
}

/// Single output of a node type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
}

/// Node type advertised by an extension.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub javascript_class_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub input: Option<InputGroup>,
    #[serde(default)]
    pub output: Option<OutputDescriptor>,
}

/// Rule type advertised by an extension.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleDescriptor {
    #[serde(default)]
    pub javascript_class_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub parameters: Option<ParameterGroup>,
}

/// One entry of the `/extensions` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtensionDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub javascript: Option<String>,
    #[serde(default)]
    pub javascript_class_name: Option<String>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub nodes: Vec<(String, NodeDescriptor)>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub rules: Vec<(String, RuleDescriptor)>,
}

fn ordered_map<'de, D, T>(deserializer: D) -> std::result::Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let map = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    map.into_iter()
        .map(|(key, value)| {
            serde_json::from_value(value)
                .map(|item| (key, item))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Whether a registered type came from a node or a rule descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Node,
    Rule,
}

/// Template used to instantiate nodes of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeType {
    pub type_name: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub subcategory: String,
    pub kind: NodeKind,
    template: Node,
}

impl NodeType {
    /// Build a node type from a node descriptor registered under `key`.
    pub fn from_node_descriptor(key: &str, descriptor: &NodeDescriptor) -> Self {
        let type_name = non_empty(&descriptor.javascript_class_name).unwrap_or(key).to_string();
        let title = non_empty(&descriptor.display_name).unwrap_or(key).to_string();

        let mut template = Node::new(type_name.clone()).with_title(title.clone());
        template.inputs.push(rule_input("in_rules", [10, 10]));
        template.inputs.push(rule_input("out_rules", [10, 25]));
        if let Some(group) = &descriptor.input {
            for (slot_key, slot) in group.required_inputs.iter().chain(&group.optional_inputs) {
                add_slot(&mut template, slot_key, slot);
            }
        }
        if let Some(output) = &descriptor.output {
            template = template.with_output(output.name.clone(), output.kind.clone());
        }

        Self {
            type_name,
            title,
            description: descriptor.description.clone().unwrap_or_default(),
            category: descriptor.category.clone().unwrap_or_default(),
            subcategory: descriptor.subcategory.clone().unwrap_or_default(),
            kind: NodeKind::Node,
            template,
        }
    }

    /// Build a node type from a rule descriptor registered under `key`.
    pub fn from_rule_descriptor(key: &str, descriptor: &RuleDescriptor) -> Self {
        let type_name = non_empty(&descriptor.javascript_class_name).unwrap_or(key).to_string();
        let title = non_empty(&descriptor.display_name).unwrap_or(key).to_string();

        let mut template = Node::new(type_name.clone())
            .with_title(title.clone())
            .with_output(RULE_GROUP, RULE_GROUP);
        template.inputs.push(rule_input("in_rules", [10, 10]));
        if let Some(group) = &descriptor.parameters {
            for (slot_key, slot) in group
                .required_parameters
                .iter()
                .chain(&group.optional_parameters)
            {
                add_slot(&mut template, slot_key, slot);
            }
        }

        Self {
            type_name,
            title,
            description: descriptor.description.clone().unwrap_or_default(),
            category: descriptor.category.clone().unwrap_or_default(),
            subcategory: descriptor.subcategory.clone().unwrap_or_default(),
            kind: NodeKind::Rule,
            template,
        }
    }

    /// A fresh node of this type, not yet added to a graph.
    pub fn instantiate(&self) -> Node {
        self.template.clone()
    }
}

fn rule_input(name: &str, pos: [i64; 2]) -> InputSlot {
    let mut slot = InputSlot::new(name, RULE_GROUP);
    slot.extra.insert("pos".to_string(), Value::from(pos.to_vec()));
    slot
}

fn add_slot(node: &mut Node, key: &str, slot: &SlotDescriptor) {
    let name = non_empty(&slot.name).unwrap_or(key);
    node.inputs.push(InputSlot::new(name, slot.kind.clone()));
    if let Some(widget) = &slot.widget {
        let widget_name = non_empty(&widget.name).unwrap_or(name);
        node.widgets.push(Widget::new(
            widget_name,
            widget.kind.clone(),
            widget.default.clone(),
        ));
    }
}

/// Registered node and rule types by type name.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeRegistry {
    types: BTreeMap<String, NodeType>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any type with the same name.
    pub fn register(&mut self, node_type: NodeType) {
        if self.types.contains_key(&node_type.type_name) {
            warn!(type_name = %node_type.type_name, "replacing registered node type");
        }
        self.types.insert(node_type.type_name.clone(), node_type);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&NodeType> {
        self.types.get(type_name)
    }

    /// New node of the given type, if registered.
    pub fn instantiate(&self, type_name: &str) -> Option<Node> {
        self.types.get(type_name).map(NodeType::instantiate)
    }

    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Host-provided behaviour attached to an extension.
///
/// Both hooks run during workflow import.
pub trait ExtensionPlugin: Send + Sync {
    /// Adjust a snapshot before it is configured into the graph.
    fn before_configure(&self, _snapshot: &mut Snapshot) {}

    /// Observe the configured graph and the node types it was missing.
    fn after_configure(&self, _graph: &Graph, _missing_types: &[String]) {}
}

/// A loaded extension.
#[derive(Clone)]
pub struct Extension {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Plugin registered for this extension's class name, if any.
    pub instance: Option<Arc<dyn ExtensionPlugin>>,
    pub nodes: BTreeMap<String, NodeDescriptor>,
    pub rules: BTreeMap<String, RuleDescriptor>,
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("has_instance", &self.instance.is_some())
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Loaded extensions, their node types and the plugins the host vetted.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, Extension>,
    node_types: NodeTypeRegistry,
    plugins: HashMap<String, Arc<dyn ExtensionPlugin>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a plugin available to the extension with this class name.
    pub fn with_plugin(
        mut self,
        class_name: impl Into<String>,
        plugin: Arc<dyn ExtensionPlugin>,
    ) -> Self {
        self.plugins.insert(class_name.into(), plugin);
        self
    }

    /// Register every extension in an `/extensions` response.
    pub fn load(&mut self, descriptors: &Value) -> Result<()> {
        let descriptors: Vec<(String, ExtensionDescriptor)> = match descriptors {
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| -> Result<(String, ExtensionDescriptor)> {
                    Ok((key.clone(), serde_json::from_value(value.clone())?))
                })
                .collect::<Result<_>>()?,
            Value::Null => Vec::new(),
            other => {
                return Err(ScaffoldError::Validation(format!(
                    "extension descriptors must be an object, got {}",
                    other
                )))
            }
        };

        for (key, descriptor) in descriptors {
            self.load_extension(key, descriptor);
        }
        Ok(())
    }

    fn load_extension(&mut self, key: String, descriptor: ExtensionDescriptor) {
        info!(
            "Loading extension: {} version: {}",
            descriptor.name, descriptor.version
        );
        if descriptor.javascript.as_deref().map_or(false, |s| !s.trim().is_empty()) {
            warn!(
                extension = %descriptor.name,
                "extension ships a client script; scripts are not evaluated"
            );
        }

        let instance = non_empty(&descriptor.javascript_class_name)
            .and_then(|class_name| self.plugins.get(class_name).cloned());
        if instance.is_none() {
            debug!(extension = %descriptor.name, "no plugin registered for extension");
        }

        let mut nodes = BTreeMap::new();
        for (node_key, node) in descriptor.nodes {
            self.node_types
                .register(NodeType::from_node_descriptor(&node_key, &node));
            nodes.insert(node_key, node);
        }
        let mut rules = BTreeMap::new();
        for (rule_key, rule) in descriptor.rules {
            self.node_types
                .register(NodeType::from_rule_descriptor(&rule_key, &rule));
            rules.insert(rule_key, rule);
        }

        self.extensions.insert(
            key,
            Extension {
                name: descriptor.name,
                version: descriptor.version,
                description: descriptor.description,
                instance,
                nodes,
                rules,
            },
        );
    }

    pub fn extensions(&self) -> impl Iterator<Item = (&String, &Extension)> {
        self.extensions.iter()
    }

    pub fn extension(&self, key: &str) -> Option<&Extension> {
        self.extensions.get(key)
    }

    pub fn node_types(&self) -> &NodeTypeRegistry {
        &self.node_types
    }

    pub fn node_types_mut(&mut self) -> &mut NodeTypeRegistry {
        &mut self.node_types
    }

    /// Plugins attached to loaded extensions.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<dyn ExtensionPlugin>> {
        self.extensions
            .values()
            .filter_map(|extension| extension.instance.as_ref())
    }
}
