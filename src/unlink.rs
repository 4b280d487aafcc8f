//! # Unlink Engine
//!
//! Severs a template→host link and disposes of the inherited copies. Two
//! modes: a plain unlink detaches every copy (clears `template_ref`, the
//! object lives on as host-local), a clear unlink deletes the copies and
//! cascades through everything that hangs off them.
//!
//! Scope is ownership-based: only host objects whose direct parent is
//! owned by the unlinking template are touched. Copies inherited from
//! templates that stay linked are never affected.

use crate::error::LinkError;
use crate::matcher::expression_references;
use crate::model::{NodeId, ObjectData, ObjectFlags, ObjectId, ObjectKind, TemplateObject, SYNC_ORDER};
use crate::store::EntityStore;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Per-call tally of what an unlink did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnlinkReport {
    /// Copies converted to host-local objects
    pub detached: u64,
    /// Objects deleted, cascades included
    pub deleted: u64,
}

impl UnlinkReport {
    /// Fold another report into this one
    pub fn merge(&mut self, other: UnlinkReport) {
        self.detached += other.detached;
        self.deleted += other.deleted;
    }
}

/// Sever one template→host link.
///
/// With `clear` unset the inherited copies are detached in place; with it
/// set they are deleted together with everything derived from them
/// (downstream copies, discovered instances, prototypes of a deleted
/// rule, triggers and graphs plotting a deleted item). Either way the
/// link row is removed last.
pub fn unlink_pair(
    store: &mut dyn EntityStore,
    template: NodeId,
    host: NodeId,
    clear: bool,
) -> Result<UnlinkReport, LinkError> {
    let scope = collect_scope(store, template, host);

    let mut report = UnlinkReport::default();
    if clear {
        let cascade = collect_cascade(store, &scope);
        report.deleted = cascade.len() as u64;
        store
            .delete_objects(&cascade)
            .map_err(LinkError::from_store)?;
        strip_dangling_dependencies(store, &scope, &cascade)?;
    } else {
        check_detach_leaves_no_spanning_trigger(store, template, host, &scope)?;
        for object in scope {
            debug!(object = %object.id, host = %host, "detached copy");
            let mut detached = object;
            detached.template_ref = None;
            store
                .update_object(detached)
                .map_err(LinkError::from_store)?;
            report.detached += 1;
        }
    }

    store.delete_link(template, host);
    info!(
        template = %template,
        host = %host,
        clear,
        detached = report.detached,
        deleted = report.deleted,
        "unlinked template"
    );
    Ok(report)
}

/// Host objects whose direct parent is owned by `template`, in reverse
/// sync order so referencing kinds come before the kinds they reference.
fn collect_scope(
    store: &dyn EntityStore,
    template: NodeId,
    host: NodeId,
) -> Vec<TemplateObject> {
    let mut scope = Vec::new();
    for class in SYNC_ORDER.iter().rev() {
        for object in store.get_objects(host, class.kind, Some(class.flags)) {
            let Some(parent_id) = object.template_ref else {
                continue;
            };
            if store
                .get_object(parent_id)
                .map_or(false, |parent| parent.owner == template)
            {
                scope.push(object);
            }
        }
    }
    scope
}

/// A detached trigger whose expression also references items inherited
/// from a template that stays linked would belong to two worlds at once;
/// such a pair can only be separated with a clear unlink.
fn check_detach_leaves_no_spanning_trigger(
    store: &dyn EntityStore,
    template: NodeId,
    host: NodeId,
    scope: &[TemplateObject],
) -> Result<(), LinkError> {
    for object in scope {
        let Some(trigger) = object.as_trigger() else {
            continue;
        };
        for key in expression_references(&trigger.expression) {
            let foreign = store
                .get_objects(host, ObjectKind::Item, None)
                .into_iter()
                .filter(|item| item.as_item().map_or(false, |i| i.key == key))
                .filter_map(|item| item.template_ref)
                .filter_map(|parent_id| store.get_object(parent_id))
                .any(|parent| parent.owner != template);
            if foreign {
                return Err(LinkError::DependentTriggerBlocksUnlink {
                    host,
                    trigger: trigger.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Expand the deletion scope through everything derived from it
fn collect_cascade(store: &dyn EntityStore, scope: &[TemplateObject]) -> Vec<ObjectId> {
    let mut doomed: FxHashSet<ObjectId> = FxHashSet::default();
    let mut queue: VecDeque<TemplateObject> = scope.iter().cloned().collect();

    while let Some(object) = queue.pop_front() {
        if !doomed.insert(object.id) {
            continue;
        }

        // copies inherited onto hosts linked below the owner
        for child_host in store.get_linked_hosts(object.owner) {
            for copy in store.get_objects(child_host, object.kind(), None) {
                if copy.template_ref == Some(object.id) {
                    queue.push_back(copy);
                }
            }
        }

        // runtime instances created from a prototype
        if object.flags == ObjectFlags::Prototype {
            for instance in
                store.get_objects(object.owner, object.kind(), Some(ObjectFlags::Discovered))
            {
                if instance.template_ref == Some(object.id) {
                    queue.push_back(instance);
                }
            }
        }

        // a rule takes its prototypes with it
        if object.flags == ObjectFlags::Rule {
            for prototype in
                store.get_objects(object.owner, ObjectKind::Item, Some(ObjectFlags::Prototype))
            {
                if prototype.as_item().and_then(|i| i.rule_ref) == Some(object.id) {
                    queue.push_back(prototype);
                }
            }
        }

        // an item takes along the triggers and graphs plotting it
        if object.kind() == ObjectKind::Item {
            let key = object.as_item().map(|i| i.key.clone()).unwrap_or_default();
            for flags in [ObjectFlags::Normal, ObjectFlags::Prototype] {
                for trigger in store.get_objects(object.owner, ObjectKind::Trigger, Some(flags)) {
                    let references = trigger
                        .as_trigger()
                        .map_or(false, |t| expression_references(&t.expression).contains(&key));
                    if references {
                        queue.push_back(trigger);
                    }
                }
                for graph in store.get_objects(object.owner, ObjectKind::Graph, Some(flags)) {
                    let references = graph.as_graph().map_or(false, |g| {
                        g.graph_items.iter().any(|gi| gi.item == object.id)
                            || g.ymin_item == Some(object.id)
                            || g.ymax_item == Some(object.id)
                    });
                    if references {
                        queue.push_back(graph);
                    }
                }
            }
        }
    }

    let mut ids: Vec<ObjectId> = doomed.into_iter().collect();
    ids.sort();
    ids
}

/// Drop dependency edges still pointing at deleted triggers
fn strip_dangling_dependencies(
    store: &mut dyn EntityStore,
    scope: &[TemplateObject],
    deleted: &[ObjectId],
) -> Result<(), LinkError> {
    let deleted: FxHashSet<ObjectId> = deleted.iter().copied().collect();
    let mut owners: Vec<NodeId> = scope.iter().map(|o| o.owner).collect();
    owners.sort();
    owners.dedup();

    for owner in owners {
        for flags in [ObjectFlags::Normal, ObjectFlags::Prototype] {
            for trigger in store.get_objects(owner, ObjectKind::Trigger, Some(flags)) {
                let Some(data) = trigger.as_trigger() else {
                    continue;
                };
                if !data.dependencies.iter().any(|d| deleted.contains(d)) {
                    continue;
                }
                let mut updated = trigger;
                if let ObjectData::Trigger(t) = &mut updated.data {
                    t.dependencies.retain(|d| !deleted.contains(d));
                }
                store
                    .update_object(updated)
                    .map_err(LinkError::from_store)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{Item, Link, NodeStatus, Trigger};
    use crate::propagate::Propagator;
    use crate::store::MemoryStore;

    fn linked_setup() -> (MemoryStore, NodeId, NodeId) {
        let mut store = MemoryStore::new();
        let template = store.add_node("Template OS", NodeStatus::Template);
        let host = store.add_node("web-1", NodeStatus::Monitored);
        store.insert_link(Link::new(template, host));
        (store, template, host)
    }

    fn insert_item(store: &mut MemoryStore, owner: NodeId, key: &str) -> ObjectId {
        store.insert_object(TemplateObject::new(
            owner,
            ObjectFlags::Normal,
            ObjectData::Item(Item::new(key, key)),
        ))
    }

    fn propagate(store: &mut MemoryStore, template: NodeId) {
        let config = EngineConfig::default();
        Propagator::new(&config)
            .propagate(store, template, None)
            .unwrap();
    }

    #[test]
    fn test_plain_unlink_detaches_copies() {
        let (mut store, template, host) = linked_setup();
        insert_item(&mut store, template, "agent.ping");
        propagate(&mut store, template);

        let report = unlink_pair(&mut store, template, host, false).unwrap();
        assert_eq!(report.detached, 1);
        assert_eq!(report.deleted, 0);

        let copies = store.get_objects(host, ObjectKind::Item, None);
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].template_ref, None);
        assert!(store.get_links(Some(&[template]), Some(&[host])).is_empty());
    }

    #[test]
    fn test_clear_unlink_deletes_copies() {
        let (mut store, template, host) = linked_setup();
        insert_item(&mut store, template, "agent.ping");
        propagate(&mut store, template);

        let report = unlink_pair(&mut store, template, host, true).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get_objects(host, ObjectKind::Item, None).is_empty());
        // the template's own object is untouched
        assert_eq!(store.get_objects(template, ObjectKind::Item, None).len(), 1);
    }

    #[test]
    fn test_scope_excludes_other_templates() {
        let (mut store, template, host) = linked_setup();
        let other = store.add_node("Template DB", NodeStatus::Template);
        store.insert_link(Link::new(other, host));
        insert_item(&mut store, template, "agent.ping");
        insert_item(&mut store, other, "db.sessions");
        propagate(&mut store, template);
        propagate(&mut store, other);

        unlink_pair(&mut store, template, host, true).unwrap();
        let remaining = store.get_objects(host, ObjectKind::Item, None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].as_item().unwrap().key, "db.sessions");
    }

    #[test]
    fn test_clear_cascades_through_rule_and_prototypes() {
        let (mut store, template, host) = linked_setup();
        let rule = store.insert_object(TemplateObject::new(
            template,
            ObjectFlags::Rule,
            ObjectData::Item(Item::new("net.if.discovery", "Interface discovery")),
        ));
        let mut prototype_item = Item::new("net.if.in[{#IFNAME}]", "Inbound traffic");
        prototype_item.rule_ref = Some(rule);
        store.insert_object(TemplateObject::new(
            template,
            ObjectFlags::Prototype,
            ObjectData::Item(prototype_item),
        ));
        propagate(&mut store, template);

        // a discovered instance hanging off the host's prototype copy
        let host_prototype =
            store.get_objects(host, ObjectKind::Item, Some(ObjectFlags::Prototype))[0].clone();
        let mut discovered = TemplateObject::new(
            host,
            ObjectFlags::Discovered,
            ObjectData::Item(Item::new("net.if.in[eth0]", "Inbound traffic eth0")),
        );
        discovered.template_ref = Some(host_prototype.id);
        store.insert_object(discovered);

        let report = unlink_pair(&mut store, template, host, true).unwrap();
        // rule copy, prototype copy, discovered instance
        assert_eq!(report.deleted, 3);
        assert!(store.get_objects(host, ObjectKind::Item, None).is_empty());
    }

    #[test]
    fn test_clear_cascades_to_downstream_hosts() {
        let mut store = MemoryStore::new();
        let template = store.add_node("Template Base", NodeStatus::Template);
        let mid = store.add_node("Template OS", NodeStatus::Template);
        let leaf = store.add_node("web-1", NodeStatus::Monitored);
        store.insert_link(Link::new(template, mid));
        store.insert_link(Link::new(mid, leaf));
        insert_item(&mut store, template, "agent.ping");
        propagate(&mut store, template);
        assert_eq!(store.get_objects(leaf, ObjectKind::Item, None).len(), 1);

        let report = unlink_pair(&mut store, template, mid, true).unwrap();
        assert_eq!(report.deleted, 2);
        assert!(store.get_objects(mid, ObjectKind::Item, None).is_empty());
        assert!(store.get_objects(leaf, ObjectKind::Item, None).is_empty());
    }

    #[test]
    fn test_detach_keeps_downstream_inheritance() {
        let mut store = MemoryStore::new();
        let template = store.add_node("Template Base", NodeStatus::Template);
        let mid = store.add_node("Template OS", NodeStatus::Template);
        let leaf = store.add_node("web-1", NodeStatus::Monitored);
        store.insert_link(Link::new(template, mid));
        store.insert_link(Link::new(mid, leaf));
        insert_item(&mut store, template, "agent.ping");
        propagate(&mut store, template);

        unlink_pair(&mut store, template, mid, false).unwrap();
        let mid_copy = &store.get_objects(mid, ObjectKind::Item, None)[0];
        assert_eq!(mid_copy.template_ref, None);
        let leaf_copy = &store.get_objects(leaf, ObjectKind::Item, None)[0];
        assert_eq!(leaf_copy.template_ref, Some(mid_copy.id));
    }

    #[test]
    fn test_spanning_trigger_blocks_plain_unlink() {
        let (mut store, template, host) = linked_setup();
        let other = store.add_node("Template DB", NodeStatus::Template);
        store.insert_link(Link::new(other, host));
        insert_item(&mut store, template, "agent.ping");
        insert_item(&mut store, other, "db.sessions");
        store.insert_object(TemplateObject::new(
            template,
            ObjectFlags::Normal,
            ObjectData::Trigger(Trigger::new(
                "Mixed",
                "{Template OS:agent.ping.last(0)}=0 & {Template OS:db.sessions.last(0)}>100",
            )),
        ));
        // the other template's item must land first so the spanning
        // expression resolves on the host
        propagate(&mut store, other);
        propagate(&mut store, template);

        let err = unlink_pair(&mut store, template, host, false).unwrap_err();
        assert!(matches!(
            err,
            LinkError::DependentTriggerBlocksUnlink { .. }
        ));
        unlink_pair(&mut store, template, host, true).unwrap();
    }

    #[test]
    fn test_clear_strips_dangling_dependencies() {
        let (mut store, template, host) = linked_setup();
        insert_item(&mut store, template, "agent.ping");
        let upstream = store.insert_object(TemplateObject::new(
            template,
            ObjectFlags::Normal,
            ObjectData::Trigger(Trigger::new(
                "Agent down",
                "{Template OS:agent.ping.last(0)}=0",
            )),
        ));
        propagate(&mut store, template);

        // a purely local trigger depending on the inherited copy
        let upstream_copy = store
            .get_objects(host, ObjectKind::Trigger, None)
            .into_iter()
            .find(|t| t.template_ref.is_some())
            .unwrap();
        let mut local = Trigger::new("Local check", "{web-1:local.heartbeat.last(0)}=0");
        local.dependencies = vec![upstream_copy.id, upstream];
        let local_id = store.insert_object(TemplateObject::new(
            host,
            ObjectFlags::Normal,
            ObjectData::Trigger(local),
        ));

        unlink_pair(&mut store, template, host, true).unwrap();
        let local = store.get_object(local_id).unwrap();
        // the deleted copy's edge is gone, the template-side edge survives
        assert_eq!(local.as_trigger().unwrap().dependencies, vec![upstream]);
    }
}
