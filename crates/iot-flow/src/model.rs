//! Flow graph model
//!
//! Flows are stored in the graph editor's wire format: nodes carry a `type`
//! tag and a free-form `data` object, edges carry an optional branch label.
//! On load the `data` object is decoded into a typed [`NodeConfig`] so the
//! engine can match on node kinds exhaustively.

use chrono::{DateTime, Utc};
use iot_core::DeviceEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::predicate::{Predicate, PredicateError, PredicateResult};

/// Kind of a flow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Trigger,
    Condition,
    Action,
}

impl NodeKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Condition => "condition",
            NodeKind::Action => "action",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger node configuration
///
/// An unset (or empty) field is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    /// Device to listen to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Event name to listen for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

impl TriggerConfig {
    /// Check whether an event fires this trigger
    ///
    /// Only the device id and event name take part in matching; the payload
    /// and timestamp are ignored.
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        fn accepts(filter: &Option<String>, value: &str) -> bool {
            match filter.as_deref() {
                None | Some("") => true,
                Some(expected) => expected == value,
            }
        }

        accepts(&self.device_id, &event.device_id) && accepts(&self.event_name, &event.event_name)
    }
}

/// Condition node configuration
///
/// The rule is kept in its wire form and parsed when the node is evaluated, so
/// a malformed rule fails the run that reaches it rather than the whole flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Predicate in JSON-logic form
    #[serde(
        default,
        rename = "rule",
        alias = "condition",
        alias = "predicate",
        skip_serializing_if = "Option::is_none"
    )]
    pub rule: Option<serde_json::Value>,
}

impl ConditionConfig {
    /// Parse the rule into a predicate
    pub fn predicate(&self) -> PredicateResult<Predicate> {
        let rule = self.rule.as_ref().ok_or(PredicateError::Missing)?;
        Predicate::parse(rule)
    }
}

/// Action node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    /// Target device
    #[serde(default)]
    pub device_id: String,

    /// Action to invoke
    #[serde(default)]
    pub action_name: String,

    /// Action parameters
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ActionConfig {
    /// Both the device and action must be named
    pub fn is_complete(&self) -> bool {
        !self.device_id.is_empty() && !self.action_name.is_empty()
    }
}

/// Typed node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Condition(ConditionConfig),
    Action(ActionConfig),
    /// A node whose `type` tag this version does not know
    Unknown {
        kind: String,
        data: serde_json::Value,
    },
}

/// Canvas position, preserved for the editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node of a flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    /// Unique within its graph
    pub id: String,

    /// Kind-specific configuration
    pub config: NodeConfig,

    /// Editor position
    pub position: Option<Position>,
}

impl Node {
    /// Create a node from its configuration
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            config,
            position: None,
        }
    }

    /// Create a trigger node; `None` fields are wildcards
    pub fn trigger(id: impl Into<String>, device_id: Option<&str>, event_name: Option<&str>) -> Self {
        Self::new(
            id,
            NodeConfig::Trigger(TriggerConfig {
                device_id: device_id.map(str::to_string),
                event_name: event_name.map(str::to_string),
            }),
        )
    }

    /// Create a condition node from a JSON-logic rule
    pub fn condition(id: impl Into<String>, rule: serde_json::Value) -> Self {
        Self::new(id, NodeConfig::Condition(ConditionConfig { rule: Some(rule) }))
    }

    /// Create an action node
    ///
    /// Non-object `params` are treated as empty.
    pub fn action(
        id: impl Into<String>,
        device_id: impl Into<String>,
        action_name: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        let params = match params {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self::new(
            id,
            NodeConfig::Action(ActionConfig {
                device_id: device_id.into(),
                action_name: action_name.into(),
                params,
            }),
        )
    }

    /// The node kind, or `None` for unknown kinds
    pub fn kind(&self) -> Option<NodeKind> {
        match &self.config {
            NodeConfig::Trigger(_) => Some(NodeKind::Trigger),
            NodeConfig::Condition(_) => Some(NodeKind::Condition),
            NodeConfig::Action(_) => Some(NodeKind::Action),
            NodeConfig::Unknown { .. } => None,
        }
    }

    /// The `type` tag as written on the wire
    pub fn kind_name(&self) -> &str {
        match &self.config {
            NodeConfig::Unknown { kind, .. } => kind,
            _ => self.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }

    /// Trigger configuration, if this is a trigger node
    pub fn as_trigger(&self) -> Option<&TriggerConfig> {
        match &self.config {
            NodeConfig::Trigger(t) => Some(t),
            _ => None,
        }
    }

    /// The node's `data` object as JSON
    pub fn data(&self) -> serde_json::Value {
        match &self.config {
            NodeConfig::Trigger(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeConfig::Condition(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeConfig::Action(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeConfig::Unknown { data, .. } => data.clone(),
        }
    }
}

/// Wire form of a node
#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

impl TryFrom<RawNode> for Node {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let data = if raw.data.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            raw.data
        };

        let config = match raw.kind.as_str() {
            "trigger" => NodeConfig::Trigger(serde_json::from_value(data)?),
            "condition" => NodeConfig::Condition(serde_json::from_value(data)?),
            "action" => NodeConfig::Action(serde_json::from_value(data)?),
            _ => NodeConfig::Unknown {
                kind: raw.kind,
                data,
            },
        };

        Ok(Self {
            id: raw.id,
            config,
            position: raw.position,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let data = node.data();
        let kind = node.kind_name().to_string();
        Self {
            id: node.id,
            kind,
            data,
            position: node.position,
        }
    }
}

/// Extra edge data written by the editor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,

    /// Branch label ("true"/"yes", "false"/"no") for edges leaving a condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
}

impl Edge {
    /// Create an unlabelled edge
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            data: None,
        }
    }

    /// Create a labelled edge
    pub fn labeled(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(id, source, target)
        }
    }

    /// The branch label, read from `label` or `data.label`
    pub fn branch_label(&self) -> Option<&str> {
        self.label
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.label.as_deref()))
    }

    /// Which condition outcome this edge follows, if it is a branch edge
    pub fn branch(&self) -> Option<bool> {
        match self.branch_label()? {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        }
    }
}

/// Nodes and edges of a flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    /// Create a graph
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving a node, in graph order
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// All trigger nodes
    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind() == Some(NodeKind::Trigger))
    }

    /// Trigger nodes that match an event, in graph order
    pub fn matching_triggers<'a, 'e>(
        &'a self,
        event: &'e DeviceEvent,
    ) -> impl Iterator<Item = &'a Node> + 'e
    where
        'a: 'e,
    {
        self.nodes
            .iter()
            .filter(move |n| n.as_trigger().is_some_and(|t| t.matches(event)))
    }

    /// Whether any trigger node matches an event
    pub fn is_triggered_by(&self, event: &DeviceEvent) -> bool {
        self.matching_triggers(event).next().is_some()
    }
}

/// A persisted automation flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(alias = "graphJson")]
    pub graph: FlowGraph,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Create a new, disabled flow with a fresh ULID
    pub fn new(name: impl Into<String>, graph: FlowGraph) -> Self {
        Self::with_id(ulid::Ulid::new().to_string(), name, graph)
    }

    /// Create a new, disabled flow with a specific id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, graph: FlowGraph) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            enabled: false,
            graph,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
