//! # templink
//!
//! A template linkage and inheritance propagation engine for monitoring
//! configurations. Templates own object definitions (applications, items,
//! discovery rules, triggers, graphs); linking a template to a host copies
//! those definitions onto the host and keeps the copies in sync, and the
//! link graph itself is validated so no host can inherit the same ancestor
//! template twice or through a cycle.
//!
//! The [`LinkEngine`] facade wires the pieces together: linkage
//! validation, per-kind object matching, breadth-first propagation, and
//! unlink with optional clear cascades. Each top-level call runs inside a
//! store transaction and either commits everything or leaves the store
//! untouched.
//!
//! ```
//! use templink::{
//!     Actor, EngineConfig, LinkEngine, LinkRequest, MemoryStore, NodeStatus,
//! };
//!
//! let mut store = MemoryStore::new();
//! let template = store.add_node("Template OS", NodeStatus::Template);
//! let host = store.add_node("web-1", NodeStatus::Monitored);
//!
//! let mut engine = LinkEngine::new(Box::new(store), EngineConfig::default());
//! let report = engine
//!     .link(&Actor::new("admin"), &LinkRequest::new(vec![template], vec![host]))
//!     .unwrap();
//! assert_eq!(report.changed(), 0);
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod matcher;
pub mod model;
pub mod propagate;
pub mod store;
pub mod unlink;
pub mod validate;

pub use config::{ConfigError, ConfigOverrides, EngineConfig};
pub use error::LinkError;
pub use model::{
    Application, Graph, GraphItem, Item, Link, Node, NodeId, NodeStatus, ObjectClass, ObjectData,
    ObjectFlags, ObjectId, ObjectKind, TemplateObject, Trigger,
};
pub use propagate::{PropagationReport, Propagator};
pub use store::{EntityStore, MemoryStore, StoreStats};
pub use unlink::UnlinkReport;
pub use validate::validate_links;

use crate::matcher::natural_key;
use rustc_hash::FxHashMap;
use tracing::info;

/// The identity on whose behalf a call runs, carried into permission
/// checks and audit logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Write-permission oracle consulted before any node is touched
pub trait Permissions {
    /// Whether `actor` may modify `node`
    fn can_edit(&self, actor: &Actor, node: NodeId) -> bool;
}

/// Grants everything; the default for embedders without their own
/// permission model
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Permissions for AllowAll {
    fn can_edit(&self, _actor: &Actor, _node: NodeId) -> bool {
        true
    }
}

impl<F> Permissions for F
where
    F: Fn(&Actor, NodeId) -> bool,
{
    fn can_edit(&self, actor: &Actor, node: NodeId) -> bool {
        self(actor, node)
    }
}

/// A request to link every named template to every named host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub templates: Vec<NodeId>,
    pub hosts: Vec<NodeId>,
}

impl LinkRequest {
    pub fn new(templates: Vec<NodeId>, hosts: Vec<NodeId>) -> Self {
        Self { templates, hosts }
    }
}

/// A request to sever templates from hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkRequest {
    pub templates: Vec<NodeId>,
    /// Restrict to these hosts; `None` severs every linked host
    pub hosts: Option<Vec<NodeId>>,
    /// Delete the inherited copies instead of detaching them
    pub clear: bool,
}

impl UnlinkRequest {
    pub fn new(templates: Vec<NodeId>, hosts: Vec<NodeId>, clear: bool) -> Self {
        Self {
            templates,
            hosts: Some(hosts),
            clear,
        }
    }

    /// Sever the templates from everything they are linked to
    pub fn all_hosts(templates: Vec<NodeId>, clear: bool) -> Self {
        Self {
            templates,
            hosts: None,
            clear,
        }
    }
}

/// The engine facade. Owns the store and brackets each call in a
/// transaction: on error every write of the call is rolled back.
pub struct LinkEngine {
    store: Box<dyn EntityStore>,
    config: EngineConfig,
    permissions: Box<dyn Permissions>,
}

impl LinkEngine {
    /// Create an engine that grants every actor every permission
    pub fn new(store: Box<dyn EntityStore>, config: EngineConfig) -> Self {
        Self::with_permissions(store, config, Box::new(AllowAll))
    }

    /// Create an engine with a caller-supplied permission oracle
    pub fn with_permissions(
        store: Box<dyn EntityStore>,
        config: EngineConfig,
        permissions: Box<dyn Permissions>,
    ) -> Self {
        Self {
            store,
            config,
            permissions,
        }
    }

    /// Read access to the underlying store
    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Mutable store access for object administration between engine
    /// calls (template edits, node management)
    pub fn store_mut(&mut self) -> &mut dyn EntityStore {
        self.store.as_mut()
    }

    /// Link templates to hosts and propagate their objects.
    ///
    /// Validates the resulting link graph, pre-checks the combined
    /// template set per host for natural-key clashes and unresolvable
    /// trigger dependencies, and only then writes: link rows first, then
    /// one sync per template over the requested hosts and transitively
    /// below them. Pairs already linked are not re-inserted but are
    /// resynced.
    pub fn link(
        &mut self,
        actor: &Actor,
        request: &LinkRequest,
    ) -> Result<PropagationReport, LinkError> {
        if request.templates.is_empty() || request.hosts.is_empty() {
            return Ok(PropagationReport::default());
        }
        let mut seen_templates = Vec::new();
        for template in &request.templates {
            if seen_templates.contains(template) {
                return Err(LinkError::DuplicateLinkage {
                    template: *template,
                    host: None,
                });
            }
            seen_templates.push(*template);
        }
        self.check_nodes_exist(request.templates.iter().chain(&request.hosts))?;
        self.check_can_edit(actor, &request.hosts)?;

        let existing = self.store.get_links(None, None);
        let mut new_links = Vec::new();
        for template in &request.templates {
            for host in &request.hosts {
                let link = Link::new(*template, *host);
                if !existing.contains(&link) {
                    new_links.push(link);
                }
            }
        }
        validate_links(&new_links, &existing)?;

        for host in &request.hosts {
            let combined = self.combined_template_set(*host, &request.templates);
            self.check_no_key_clash(*host, &combined, &request.templates)?;
            self.check_trigger_dependencies_resolvable(*host, &combined, &request.templates)?;
        }

        self.store.begin();
        let result = (|| {
            for link in &new_links {
                self.store.insert_link(*link);
            }
            let mut report = PropagationReport::default();
            let propagator = Propagator::new(&self.config);
            for template in &request.templates {
                report.merge(propagator.propagate(
                    self.store.as_mut(),
                    *template,
                    Some(&request.hosts),
                )?);
            }
            Ok(report)
        })();

        match result {
            Ok(report) => {
                self.store.commit();
                info!(
                    actor = %actor.name,
                    templates = ?request.templates,
                    hosts = ?request.hosts,
                    created = report.created,
                    updated = report.updated,
                    adopted = report.adopted,
                    "linked templates"
                );
                Ok(report)
            }
            Err(err) => {
                self.store.rollback();
                Err(err)
            }
        }
    }

    /// Sever template→host links, detaching or clearing the copies
    pub fn unlink(
        &mut self,
        actor: &Actor,
        request: &UnlinkRequest,
    ) -> Result<UnlinkReport, LinkError> {
        self.check_nodes_exist(
            request
                .templates
                .iter()
                .chain(request.hosts.iter().flatten()),
        )?;

        let mut pairs = Vec::new();
        for template in &request.templates {
            let hosts = match &request.hosts {
                Some(hosts) => hosts.clone(),
                None => self.store.get_linked_hosts(*template),
            };
            for host in hosts {
                pairs.push((*template, host));
            }
        }
        let mut hosts: Vec<NodeId> = pairs.iter().map(|(_, host)| *host).collect();
        hosts.sort();
        hosts.dedup();
        self.check_can_edit(actor, &hosts)?;

        self.store.begin();
        let result = (|| {
            let mut report = UnlinkReport::default();
            for (template, host) in &pairs {
                report.merge(unlink::unlink_pair(
                    self.store.as_mut(),
                    *template,
                    *host,
                    request.clear,
                )?);
            }
            Ok(report)
        })();

        match result {
            Ok(report) => {
                self.store.commit();
                info!(
                    actor = %actor.name,
                    templates = ?request.templates,
                    hosts = ?request.hosts,
                    clear = request.clear,
                    detached = report.detached,
                    deleted = report.deleted,
                    "unlinked templates"
                );
                Ok(report)
            }
            Err(err) => {
                self.store.rollback();
                Err(err)
            }
        }
    }

    /// Resync a template's subtree after its objects were edited
    pub fn propagate(
        &mut self,
        actor: &Actor,
        template: NodeId,
    ) -> Result<PropagationReport, LinkError> {
        self.check_nodes_exist(std::iter::once(&template))?;
        self.check_can_edit(actor, &[template])?;

        self.store.begin();
        let propagator = Propagator::new(&self.config);
        match propagator.propagate(self.store.as_mut(), template, None) {
            Ok(report) => {
                self.store.commit();
                info!(
                    actor = %actor.name,
                    template = %template,
                    changed = report.changed(),
                    "propagated template"
                );
                Ok(report)
            }
            Err(err) => {
                self.store.rollback();
                Err(err)
            }
        }
    }

    fn check_nodes_exist<'a>(
        &self,
        nodes: impl Iterator<Item = &'a NodeId>,
    ) -> Result<(), LinkError> {
        for node in nodes {
            if self.store.get_node(*node).is_none() {
                return Err(LinkError::invariant(format!("unknown node {node}")));
            }
        }
        Ok(())
    }

    fn check_can_edit(&self, actor: &Actor, nodes: &[NodeId]) -> Result<(), LinkError> {
        for node in nodes {
            if !self.permissions.can_edit(actor, *node) {
                return Err(LinkError::PermissionDenied {
                    actor: actor.name.clone(),
                    node: *node,
                });
            }
        }
        Ok(())
    }

    /// Templates already linked to `host` plus the ones being linked now
    fn combined_template_set(&self, host: NodeId, adding: &[NodeId]) -> Vec<NodeId> {
        let mut combined: Vec<NodeId> = self
            .store
            .get_links(None, Some(&[host]))
            .into_iter()
            .map(|link| link.template)
            .collect();
        for template in adding {
            if !combined.contains(template) {
                combined.push(*template);
            }
        }
        combined.sort();
        combined.dedup();
        combined
    }

    /// Two templates feeding one host must not both define the same item
    /// key or application name; propagation would resolve the clash
    /// arbitrarily. Pre-existing clashes between already-linked templates
    /// are left alone.
    fn check_no_key_clash(
        &self,
        host: NodeId,
        combined: &[NodeId],
        adding: &[NodeId],
    ) -> Result<(), LinkError> {
        let classes = [
            (ObjectKind::Application, ObjectFlags::Normal),
            (ObjectKind::Item, ObjectFlags::Rule),
            (ObjectKind::Item, ObjectFlags::Prototype),
            (ObjectKind::Item, ObjectFlags::Normal),
        ];
        for (kind, flags) in classes {
            let mut owners: FxHashMap<String, NodeId> = FxHashMap::default();
            for template in combined {
                for object in self.store.get_objects(*template, kind, Some(flags)) {
                    let key = natural_key(&object);
                    if let Some(previous) = owners.get(&key) {
                        if adding.contains(template) || adding.contains(previous) {
                            return Err(LinkError::ForeignTemplateConflict {
                                host,
                                key,
                                template: *previous,
                            });
                        }
                    } else {
                        owners.insert(key, *template);
                    }
                }
            }
        }
        Ok(())
    }

    /// A trigger of a template being linked may only depend on triggers
    /// of templates the host will also be linked to; anything else could
    /// never be re-pointed on the host.
    fn check_trigger_dependencies_resolvable(
        &self,
        host: NodeId,
        combined: &[NodeId],
        adding: &[NodeId],
    ) -> Result<(), LinkError> {
        for template in adding {
            for flags in [ObjectFlags::Normal, ObjectFlags::Prototype] {
                for trigger in self
                    .store
                    .get_objects(*template, ObjectKind::Trigger, Some(flags))
                {
                    let Some(data) = trigger.as_trigger() else {
                        continue;
                    };
                    for dependency in &data.dependencies {
                        let upstream = self.store.get_object(*dependency).ok_or_else(|| {
                            LinkError::invariant(format!(
                                "trigger {} depends on missing trigger {dependency}",
                                trigger.id
                            ))
                        })?;
                        let upstream_is_template = self
                            .store
                            .get_node(upstream.owner)
                            .map_or(false, |n| n.is_template());
                        if upstream_is_template && !combined.contains(&upstream.owner) {
                            return Err(LinkError::MissingDependency {
                                host,
                                key: natural_key(&upstream),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
