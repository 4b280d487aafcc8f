//! # Data Model
//!
//! Core data structures for template linkage: node and object identifiers,
//! the template→host link edge, and the typed template objects that
//! propagation copies onto linked hosts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact identifier for nodes (hosts and templates share one id space)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Compact identifier for template objects.
///
/// `ObjectId(0)` is the unassigned sentinel; the store allocates a real id
/// on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Whether this id has been assigned by the store yet
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

/// Monitoring status of a node. `Template` nodes own object definitions
/// that propagation copies onto linked hosts; a node of any status may act
/// as a template for further hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Monitored,
    NotMonitored,
    Template,
}

/// A host or a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Display name, also used as the host qualifier in trigger expressions
    pub name: String,
    /// Monitoring status
    pub status: NodeStatus,
}

impl Node {
    /// Create a new node
    pub fn new(id: NodeId, name: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            id,
            name: name.into(),
            status,
        }
    }

    /// Whether this node is a template definition
    pub fn is_template(&self) -> bool {
        self.status == NodeStatus::Template
    }
}

/// A directed template→host edge authorizing propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// The template whose objects are inherited
    pub template: NodeId,
    /// The host consuming the template's objects
    pub host: NodeId,
}

impl Link {
    /// Create a new link edge
    pub fn new(template: NodeId, host: NodeId) -> Self {
        Self { template, host }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.template, self.host)
    }
}

/// Variant discriminator for template objects.
///
/// Natural keys are unique within one node per `(kind, flags)` class, so a
/// normal item and an item prototype may carry the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectFlags {
    /// A plain, directly configured object
    Normal,
    /// A low-level discovery rule (item variant)
    Rule,
    /// A prototype owned by a discovery rule
    Prototype,
    /// A runtime instance generated from a prototype
    Discovered,
}

impl fmt::Display for ObjectFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectFlags::Normal => "normal",
            ObjectFlags::Rule => "discovery rule",
            ObjectFlags::Prototype => "prototype",
            ObjectFlags::Discovered => "discovered",
        };
        f.write_str(s)
    }
}

/// The object kinds propagation understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Application,
    Item,
    Trigger,
    Graph,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Application => "application",
            ObjectKind::Item => "item",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Graph => "graph",
        };
        f.write_str(s)
    }
}

/// A `(kind, flags)` class of objects that propagation syncs as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectClass {
    pub kind: ObjectKind,
    pub flags: ObjectFlags,
}

/// The fixed propagation order. Later classes reference earlier ones
/// (a trigger needs its items, a graph needs its items), so both `link`
/// and explicit resync walk classes in exactly this order. Unlink walks
/// it in reverse. Trigger dependency edges are synced in a dedicated pass
/// after all classes.
pub const SYNC_ORDER: [ObjectClass; 8] = [
    ObjectClass {
        kind: ObjectKind::Application,
        flags: ObjectFlags::Normal,
    },
    ObjectClass {
        kind: ObjectKind::Item,
        flags: ObjectFlags::Rule,
    },
    ObjectClass {
        kind: ObjectKind::Item,
        flags: ObjectFlags::Prototype,
    },
    ObjectClass {
        kind: ObjectKind::Item,
        flags: ObjectFlags::Normal,
    },
    ObjectClass {
        kind: ObjectKind::Trigger,
        flags: ObjectFlags::Normal,
    },
    ObjectClass {
        kind: ObjectKind::Trigger,
        flags: ObjectFlags::Prototype,
    },
    ObjectClass {
        kind: ObjectKind::Graph,
        flags: ObjectFlags::Prototype,
    },
    ObjectClass {
        kind: ObjectKind::Graph,
        flags: ObjectFlags::Normal,
    },
];

/// An application: a plain named grouping of items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Natural key within the owning node
    pub name: String,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// An item, discovery rule or item prototype, depending on the carrying
/// object's flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Natural key within the owning node (per flags class)
    pub key: String,
    /// Display name
    pub name: String,
    /// Polling interval in seconds
    pub delay: u32,
    /// Value units, free-form
    pub units: String,
    /// For prototypes: the discovery rule this prototype belongs to
    pub rule_ref: Option<ObjectId>,
}

impl Item {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            delay: 60,
            units: String::new(),
            rule_ref: None,
        }
    }
}

/// A trigger or trigger prototype.
///
/// The expression references items as `{<host>:<key>.<func>(<args>)}`
/// tokens; propagation rewrites the host qualifier for each target host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Display name; natural identity is the normalized expression
    pub name: String,
    /// Canonical expression text
    pub expression: String,
    /// Severity, 0 (unclassified) to 5 (disaster)
    pub severity: u8,
    /// Triggers this trigger depends on (upstream problems suppress it)
    pub dependencies: Vec<ObjectId>,
}

impl Trigger {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            severity: 0,
            dependencies: Vec::new(),
        }
    }
}

/// One plotted item of a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphItem {
    /// The plotted item
    pub item: ObjectId,
    /// Draw color, `RRGGBB`
    pub color: String,
    /// Position within the graph
    pub sort_order: u32,
}

impl GraphItem {
    pub fn new(item: ObjectId, color: impl Into<String>, sort_order: u32) -> Self {
        Self {
            item,
            color: color.into(),
            sort_order,
        }
    }
}

/// A graph or graph prototype
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    /// Natural key within the owning node, compared case-insensitively
    pub name: String,
    /// The plotted items
    pub graph_items: Vec<GraphItem>,
    /// Optional item supplying the Y-axis minimum
    pub ymin_item: Option<ObjectId>,
    /// Optional item supplying the Y-axis maximum
    pub ymax_item: Option<ObjectId>,
}

impl Graph {
    pub fn new(name: impl Into<String>, graph_items: Vec<GraphItem>) -> Self {
        Self {
            name: name.into(),
            graph_items,
            ymin_item: None,
            ymax_item: None,
        }
    }
}

/// Kind-specific payload of a template object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectData {
    Application(Application),
    Item(Item),
    Trigger(Trigger),
    Graph(Graph),
}

impl ObjectData {
    /// The object kind of this payload
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectData::Application(_) => ObjectKind::Application,
            ObjectData::Item(_) => ObjectKind::Item,
            ObjectData::Trigger(_) => ObjectKind::Trigger,
            ObjectData::Graph(_) => ObjectKind::Graph,
        }
    }
}

/// A template-owned object or a host-local copy of one.
///
/// `template_ref == None` means locally owned; otherwise it names the
/// parent object this copy was inherited from. The copy's lifetime is
/// bounded by its ancestor's when unlink runs with clear semantics;
/// a plain unlink severs `template_ref` and the copy lives on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateObject {
    /// Unique identifier, assigned by the store
    pub id: ObjectId,
    /// The node this object lives on
    pub owner: NodeId,
    /// The parent object this copy was inherited from, if any
    pub template_ref: Option<ObjectId>,
    /// Variant discriminator
    pub flags: ObjectFlags,
    /// Kind-specific payload
    pub data: ObjectData,
}

impl TemplateObject {
    /// Create a locally owned object with an unassigned id
    pub fn new(owner: NodeId, flags: ObjectFlags, data: ObjectData) -> Self {
        Self {
            id: ObjectId(0),
            owner,
            template_ref: None,
            flags,
            data,
        }
    }

    /// The object kind
    pub fn kind(&self) -> ObjectKind {
        self.data.kind()
    }

    /// The `(kind, flags)` class this object syncs under
    pub fn class(&self) -> ObjectClass {
        ObjectClass {
            kind: self.kind(),
            flags: self.flags,
        }
    }

    pub fn as_application(&self) -> Option<&Application> {
        match &self.data {
            ObjectData::Application(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&Item> {
        match &self.data {
            ObjectData::Item(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_trigger(&self) -> Option<&Trigger> {
        match &self.data {
            ObjectData::Trigger(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_graph(&self) -> Option<&Graph> {
        match &self.data {
            ObjectData::Graph(g) => Some(g),
            _ => None,
        }
    }
}
