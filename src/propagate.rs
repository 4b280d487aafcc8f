//! # Inheritance Propagation
//!
//! Copies template-owned objects onto linked hosts and keeps existing
//! copies in sync. Propagation walks one template's subtree breadth-first
//! with an explicit worklist: every directly linked host is synced first,
//! then every host linked below those, so an object created on a
//! mid-chain template is present before its own children ask for it.
//!
//! Object classes are synced in [`SYNC_ORDER`]; trigger dependency edges
//! are re-pointed in a dedicated pass per pair once every trigger copy
//! exists.

use crate::adapter::adapter_for;
use crate::config::EngineConfig;
use crate::error::LinkError;
use crate::matcher::find_match;
use crate::model::{NodeId, ObjectData, ObjectFlags, ObjectId, ObjectKind, TemplateObject, SYNC_ORDER};
use crate::store::EntityStore;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::debug;

/// Per-call tally of what propagation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Objects newly created on hosts
    pub created: u64,
    /// Existing copies rewritten to match their parent
    pub updated: u64,
    /// Host-local objects grafted under a parent
    pub adopted: u64,
    /// Copies already in sync
    pub unchanged: u64,
}

impl PropagationReport {
    /// Total number of copies that changed
    pub fn changed(&self) -> u64 {
        self.created + self.updated + self.adopted
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: PropagationReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.adopted += other.adopted;
        self.unchanged += other.unchanged;
    }
}

enum Outcome {
    Created,
    Updated,
    Adopted,
    Unchanged,
}

#[derive(Debug, Clone, Copy)]
struct WorkItem {
    template: NodeId,
    host: NodeId,
    depth: usize,
}

/// Walks a template subtree and syncs every copy
pub struct Propagator<'a> {
    config: &'a EngineConfig,
}

impl<'a> Propagator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Sync `template`'s objects onto its linked hosts and transitively
    /// onwards.
    ///
    /// `host_filter` restricts the first level only: a filtered host's
    /// own children are always resynced, otherwise a mid-chain sync
    /// would leave the tail of the chain stale.
    pub fn propagate(
        &self,
        store: &mut dyn EntityStore,
        template: NodeId,
        host_filter: Option<&[NodeId]>,
    ) -> Result<PropagationReport, LinkError> {
        let mut report = PropagationReport::default();
        let mut queue: VecDeque<WorkItem> = VecDeque::new();
        let mut seen: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();

        for host in store.get_linked_hosts(template) {
            if host_filter.map_or(true, |f| f.contains(&host)) {
                queue.push_back(WorkItem {
                    template,
                    host,
                    depth: 0,
                });
            }
        }

        while let Some(work) = queue.pop_front() {
            if work.depth >= self.config.max_chain_depth {
                return Err(LinkError::invariant(format!(
                    "template chain below {template} exceeds depth {}",
                    self.config.max_chain_depth
                )));
            }
            if !seen.insert((work.template, work.host)) {
                continue;
            }
            report.merge(self.sync_pair(store, work.template, work.host)?);
            for child in store.get_linked_hosts(work.host) {
                queue.push_back(WorkItem {
                    template: work.host,
                    host: child,
                    depth: work.depth + 1,
                });
            }
        }

        Ok(report)
    }

    /// Sync one template→host pair: every class in order, then trigger
    /// dependency edges.
    pub fn sync_pair(
        &self,
        store: &mut dyn EntityStore,
        template: NodeId,
        host: NodeId,
    ) -> Result<PropagationReport, LinkError> {
        let mut report = PropagationReport::default();
        for class in SYNC_ORDER {
            let parents = store.get_objects(template, class.kind, Some(class.flags));
            for parent in parents {
                match self.sync_one(store, &parent, host)? {
                    Outcome::Created => report.created += 1,
                    Outcome::Updated => report.updated += 1,
                    Outcome::Adopted => report.adopted += 1,
                    Outcome::Unchanged => report.unchanged += 1,
                }
            }
        }
        report.updated += self.sync_trigger_dependencies(store, template, host)?;
        debug!(
            template = %template,
            host = %host,
            created = report.created,
            updated = report.updated,
            adopted = report.adopted,
            "synced pair"
        );
        Ok(report)
    }

    /// Create, resync or adopt the host copy of one parent object
    fn sync_one(
        &self,
        store: &mut dyn EntityStore,
        parent: &TemplateObject,
        host: NodeId,
    ) -> Result<Outcome, LinkError> {
        let adapter = adapter_for(parent.kind());

        let mut adapted = parent.clone();
        adapted.id = ObjectId(0);
        adapted.owner = host;
        adapted.template_ref = Some(parent.id);
        adapter.substitute_host_refs(store, &mut adapted, host)?;

        let Some(existing) = find_match(store, parent, host)? else {
            let id = store.insert_object(adapted);
            debug!(parent = %parent.id, copy = %id, host = %host, "created copy");
            return Ok(Outcome::Created);
        };

        match existing.template_ref {
            Some(ancestor) if ancestor == parent.id => {
                if adapter.differs(&adapted, &existing) {
                    let mut updated = existing;
                    adapter.apply_update(&adapted, &mut updated);
                    store.update_object(updated).map_err(LinkError::from_store)?;
                    Ok(Outcome::Updated)
                } else {
                    Ok(Outcome::Unchanged)
                }
            }
            Some(foreign) => {
                let template = store
                    .get_object(foreign)
                    .map(|o| o.owner)
                    .unwrap_or(parent.owner);
                Err(LinkError::ForeignTemplateConflict {
                    host,
                    key: adapter.natural_key(parent),
                    template,
                })
            }
            None => {
                if self.config.adopt_identical_locals
                    && adapter.adoptable(store, &adapted, &existing)?
                {
                    let mut adopted = existing;
                    adopted.template_ref = Some(parent.id);
                    adapter.apply_update(&adapted, &mut adopted);
                    store.update_object(adopted).map_err(LinkError::from_store)?;
                    Ok(Outcome::Adopted)
                } else {
                    Err(LinkError::NameCollision {
                        host,
                        key: adapter.natural_key(parent),
                    })
                }
            }
        }
    }

    /// Re-point trigger dependency edges on the host's copies.
    ///
    /// A dependency targeting a trigger that also has a copy on the host
    /// is re-pointed at that copy; a dependency on a trigger living
    /// elsewhere (another host, an unlinked template) is kept verbatim.
    /// Returns the number of copies whose edge list changed.
    fn sync_trigger_dependencies(
        &self,
        store: &mut dyn EntityStore,
        template: NodeId,
        host: NodeId,
    ) -> Result<u64, LinkError> {
        let mut rewritten = 0;
        for flags in [ObjectFlags::Normal, ObjectFlags::Prototype] {
            let parents = store.get_objects(template, ObjectKind::Trigger, Some(flags));
            for parent in parents {
                let dependencies = match parent.as_trigger() {
                    Some(t) if !t.dependencies.is_empty() => t.dependencies.clone(),
                    _ => continue,
                };
                let Some(copy) = find_match(store, &parent, host)? else {
                    continue;
                };

                let mut mapped = Vec::with_capacity(dependencies.len());
                for dependency in dependencies {
                    let upstream = store.get_object(dependency).ok_or_else(|| {
                        LinkError::invariant(format!(
                            "trigger {} depends on missing trigger {dependency}",
                            parent.id
                        ))
                    })?;
                    let target = find_match(store, &upstream, host)?
                        .map(|m| m.id)
                        .unwrap_or(dependency);
                    mapped.push(target);
                }

                if copy.as_trigger().map(|t| &t.dependencies) != Some(&mapped) {
                    let mut updated = copy;
                    if let ObjectData::Trigger(trigger) = &mut updated.data {
                        trigger.dependencies = mapped;
                    }
                    store.update_object(updated).map_err(LinkError::from_store)?;
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }
}
