//! # Entity Store
//!
//! The persistence seam of the engine. The engine consumes the narrow
//! `EntityStore` trait and never issues queries of its own; `MemoryStore`
//! is the reference implementation used in tests and by embedders without
//! an external database.

use crate::model::{Link, Node, NodeId, NodeStatus, ObjectFlags, ObjectId, ObjectKind, TemplateObject};
use anyhow::{bail, Result};
use hashbrown::HashMap;

/// Write counters, useful for asserting that a resync was a no-op
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl StoreStats {
    /// Total number of mutating operations
    pub fn writes(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

/// Storage abstraction the engine operates against.
///
/// One top-level engine call (`link`, `unlink`, explicit propagate) is
/// bracketed by `begin`/`commit`, with `rollback` on error; the store is
/// responsible for serializing concurrent calls that touch overlapping
/// template or host ids.
pub trait EntityStore {
    /// Look up a node by id
    fn get_node(&self, id: NodeId) -> Option<Node>;

    /// Fetch link rows, optionally restricted by template and/or host ids
    fn get_links(&self, templates: Option<&[NodeId]>, hosts: Option<&[NodeId]>) -> Vec<Link>;

    /// Hosts directly linked to the given template, in stable id order
    fn get_linked_hosts(&self, template: NodeId) -> Vec<NodeId>;

    /// Objects owned by a node, optionally restricted to one flags class,
    /// in stable id order
    fn get_objects(
        &self,
        owner: NodeId,
        kind: ObjectKind,
        flags: Option<ObjectFlags>,
    ) -> Vec<TemplateObject>;

    /// Look up a single object by id
    fn get_object(&self, id: ObjectId) -> Option<TemplateObject>;

    /// Insert an object, assigning an id when the object carries the
    /// unassigned sentinel
    fn insert_object(&mut self, object: TemplateObject) -> ObjectId;

    /// Replace an existing object by id
    fn update_object(&mut self, object: TemplateObject) -> Result<()>;

    /// Delete objects by id; unknown ids are ignored
    fn delete_objects(&mut self, ids: &[ObjectId]) -> Result<()>;

    /// Insert a link row
    fn insert_link(&mut self, link: Link);

    /// Delete a link row if present
    fn delete_link(&mut self, template: NodeId, host: NodeId);

    /// Begin a write transaction
    fn begin(&mut self);

    /// Commit the open transaction
    fn commit(&mut self);

    /// Discard every write since `begin`
    fn rollback(&mut self);

    /// Cumulative write counters
    fn stats(&self) -> StoreStats;
}

#[derive(Debug, Clone, Default)]
struct State {
    nodes: HashMap<NodeId, Node>,
    objects: HashMap<ObjectId, TemplateObject>,
    links: Vec<Link>,
    next_node_id: u64,
    next_object_id: u64,
}

/// In-memory store with snapshot-based transactions
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: State,
    snapshot: Option<State>,
    stats: StoreStats,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its id
    pub fn add_node(&mut self, name: impl Into<String>, status: NodeStatus) -> NodeId {
        self.state.next_node_id += 1;
        let id = NodeId(self.state.next_node_id);
        self.state.nodes.insert(id, Node::new(id, name, status));
        id
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.state.objects.len()
    }

    /// Number of stored link rows
    pub fn link_count(&self) -> usize {
        self.state.links.len()
    }
}

impl EntityStore for MemoryStore {
    fn get_node(&self, id: NodeId) -> Option<Node> {
        self.state.nodes.get(&id).cloned()
    }

    fn get_links(&self, templates: Option<&[NodeId]>, hosts: Option<&[NodeId]>) -> Vec<Link> {
        let mut links: Vec<Link> = self
            .state
            .links
            .iter()
            .filter(|link| templates.map_or(true, |t| t.contains(&link.template)))
            .filter(|link| hosts.map_or(true, |h| h.contains(&link.host)))
            .copied()
            .collect();
        links.sort_by_key(|link| (link.template, link.host));
        links
    }

    fn get_linked_hosts(&self, template: NodeId) -> Vec<NodeId> {
        let mut hosts: Vec<NodeId> = self
            .state
            .links
            .iter()
            .filter(|link| link.template == template)
            .map(|link| link.host)
            .collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    fn get_objects(
        &self,
        owner: NodeId,
        kind: ObjectKind,
        flags: Option<ObjectFlags>,
    ) -> Vec<TemplateObject> {
        let mut objects: Vec<TemplateObject> = self
            .state
            .objects
            .values()
            .filter(|object| object.owner == owner && object.kind() == kind)
            .filter(|object| flags.map_or(true, |f| object.flags == f))
            .cloned()
            .collect();
        objects.sort_by_key(|object| object.id);
        objects
    }

    fn get_object(&self, id: ObjectId) -> Option<TemplateObject> {
        self.state.objects.get(&id).cloned()
    }

    fn insert_object(&mut self, mut object: TemplateObject) -> ObjectId {
        if !object.id.is_assigned() {
            self.state.next_object_id += 1;
            object.id = ObjectId(self.state.next_object_id);
        } else {
            self.state.next_object_id = self.state.next_object_id.max(object.id.0);
        }
        let id = object.id;
        self.state.objects.insert(id, object);
        self.stats.inserts += 1;
        id
    }

    fn update_object(&mut self, object: TemplateObject) -> Result<()> {
        if !self.state.objects.contains_key(&object.id) {
            bail!("cannot update unknown object {}", object.id);
        }
        self.state.objects.insert(object.id, object);
        self.stats.updates += 1;
        Ok(())
    }

    fn delete_objects(&mut self, ids: &[ObjectId]) -> Result<()> {
        for id in ids {
            if self.state.objects.remove(id).is_some() {
                self.stats.deletes += 1;
            }
        }
        Ok(())
    }

    fn insert_link(&mut self, link: Link) {
        if !self.state.links.contains(&link) {
            self.state.links.push(link);
            self.stats.inserts += 1;
        }
    }

    fn delete_link(&mut self, template: NodeId, host: NodeId) {
        let before = self.state.links.len();
        self.state
            .links
            .retain(|link| !(link.template == template && link.host == host));
        self.stats.deletes += (before - self.state.links.len()) as u64;
    }

    fn begin(&mut self) {
        self.snapshot = Some(self.state.clone());
    }

    fn commit(&mut self) {
        self.snapshot = None;
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.state = snapshot;
        }
    }

    fn stats(&self) -> StoreStats {
        self.stats
    }
}
