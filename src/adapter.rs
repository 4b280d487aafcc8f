//! # Object Adapters
//!
//! One capability set per object kind, so the propagator and the unlink
//! engine stay generic instead of re-implementing the same
//! create/update/conflict decision tree per kind. An adapter knows how to
//! name an object, re-point its host-bound references, decide whether a
//! host-local twin is adoptable, and apply a parent's content to an
//! existing copy.

use crate::error::LinkError;
use crate::matcher;
use crate::model::{NodeId, ObjectData, ObjectFlags, ObjectId, ObjectKind, TemplateObject};
use crate::store::EntityStore;

/// Kind-specific behavior consumed by the propagator
pub trait ObjectAdapter {
    /// The kind this adapter serves
    fn kind(&self) -> ObjectKind;

    /// The display form of the natural identity key
    fn natural_key(&self, object: &TemplateObject) -> String {
        matcher::natural_key(object)
    }

    /// Re-point every host-bound reference of `object` (graph items,
    /// Y-axis items, trigger expression items, a prototype's discovery
    /// rule) at the equivalent object already present on `host`.
    ///
    /// A reference with no equivalent on the host is a
    /// [`LinkError::MissingDependency`], never silently dropped.
    fn substitute_host_refs(
        &self,
        store: &dyn EntityStore,
        object: &mut TemplateObject,
        host: NodeId,
    ) -> Result<(), LinkError>;

    /// Whether a locally owned host object may be adopted as the copy of
    /// `adapted` (its `template_ref` grafted). Only content-identical
    /// locals qualify; a key match with different content is a collision,
    /// never a silent overwrite. The default compares the full payload;
    /// applications carry nothing beyond their already-matched name, so
    /// they inherit it as-is.
    fn adoptable(
        &self,
        _store: &dyn EntityStore,
        adapted: &TemplateObject,
        existing: &TemplateObject,
    ) -> Result<bool, LinkError> {
        Ok(adapted.data == existing.data)
    }

    /// Whether a resync of `existing` from `adapted` would change
    /// anything
    fn differs(&self, adapted: &TemplateObject, existing: &TemplateObject) -> bool {
        adapted.data != existing.data
    }

    /// Write the parent's content into an existing copy
    fn apply_update(&self, adapted: &TemplateObject, existing: &mut TemplateObject) {
        existing.data = adapted.data.clone();
    }
}

/// Find the host item equivalent to the item identified by `key`, within
/// the given flags class.
fn host_item_by_key(
    store: &dyn EntityStore,
    host: NodeId,
    key: &str,
    flags: Option<ObjectFlags>,
) -> Option<ObjectId> {
    store
        .get_objects(host, ObjectKind::Item, flags)
        .into_iter()
        .find(|o| o.as_item().map_or(false, |i| i.key == key))
        .map(|o| o.id)
}

/// Resolve a referenced template item id to the equivalent host item id
fn substitute_item_ref(
    store: &dyn EntityStore,
    reference: ObjectId,
    host: NodeId,
) -> Result<ObjectId, LinkError> {
    let parent_item = store
        .get_object(reference)
        .ok_or_else(|| LinkError::invariant(format!("referenced item {reference} is missing")))?;
    let key = parent_item
        .as_item()
        .ok_or_else(|| LinkError::invariant(format!("{reference} is not an item")))?
        .key
        .clone();
    host_item_by_key(store, host, &key, Some(parent_item.flags)).ok_or(
        LinkError::MissingDependency {
            host,
            key,
        },
    )
}

struct ApplicationAdapter;

impl ObjectAdapter for ApplicationAdapter {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Application
    }

    fn substitute_host_refs(
        &self,
        _store: &dyn EntityStore,
        _object: &mut TemplateObject,
        _host: NodeId,
    ) -> Result<(), LinkError> {
        Ok(())
    }
}

struct ItemAdapter;

impl ObjectAdapter for ItemAdapter {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Item
    }

    fn substitute_host_refs(
        &self,
        store: &dyn EntityStore,
        object: &mut TemplateObject,
        host: NodeId,
    ) -> Result<(), LinkError> {
        let ObjectData::Item(item) = &mut object.data else {
            return Err(LinkError::invariant(format!("{} is not an item", object.id)));
        };
        // a prototype follows its discovery rule onto the host
        if let Some(rule_ref) = item.rule_ref {
            let parent_rule = store.get_object(rule_ref).ok_or_else(|| {
                LinkError::invariant(format!("discovery rule {rule_ref} is missing"))
            })?;
            let rule_key = parent_rule
                .as_item()
                .ok_or_else(|| LinkError::invariant(format!("{rule_ref} is not an item")))?
                .key
                .clone();
            let host_rule = host_item_by_key(store, host, &rule_key, Some(ObjectFlags::Rule))
                .ok_or(LinkError::MissingDependency {
                    host,
                    key: rule_key,
                })?;
            item.rule_ref = Some(host_rule);
        }
        Ok(())
    }
}

struct TriggerAdapter;

impl ObjectAdapter for TriggerAdapter {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Trigger
    }

    fn substitute_host_refs(
        &self,
        store: &dyn EntityStore,
        object: &mut TemplateObject,
        host: NodeId,
    ) -> Result<(), LinkError> {
        let host_name = store
            .get_node(host)
            .ok_or_else(|| LinkError::invariant(format!("unknown node {host}")))?
            .name;
        let ObjectData::Trigger(trigger) = &mut object.data else {
            return Err(LinkError::invariant(format!(
                "{} is not a trigger",
                object.id
            )));
        };
        for key in matcher::expression_references(&trigger.expression) {
            if host_item_by_key(store, host, &key, None).is_none() {
                return Err(LinkError::MissingDependency { host, key });
            }
        }
        trigger.expression = matcher::retarget_expression(&trigger.expression, &host_name);
        // dependency edges are synced in their own pass, after every
        // trigger copy exists
        trigger.dependencies.clear();
        Ok(())
    }

    fn adoptable(
        &self,
        _store: &dyn EntityStore,
        adapted: &TemplateObject,
        existing: &TemplateObject,
    ) -> Result<bool, LinkError> {
        // dependencies stay host-managed and are excluded, same as in the
        // resync diff
        Ok(!self.differs(adapted, existing))
    }

    fn differs(&self, adapted: &TemplateObject, existing: &TemplateObject) -> bool {
        match (adapted.as_trigger(), existing.as_trigger()) {
            (Some(a), Some(b)) => {
                a.name != b.name || a.expression != b.expression || a.severity != b.severity
            }
            _ => true,
        }
    }

    fn apply_update(&self, adapted: &TemplateObject, existing: &mut TemplateObject) {
        let kept = existing.as_trigger().map(|t| t.dependencies.clone());
        existing.data = adapted.data.clone();
        if let (ObjectData::Trigger(trigger), Some(dependencies)) = (&mut existing.data, kept) {
            trigger.dependencies = dependencies;
        }
    }
}

struct GraphAdapter;

impl ObjectAdapter for GraphAdapter {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Graph
    }

    fn substitute_host_refs(
        &self,
        store: &dyn EntityStore,
        object: &mut TemplateObject,
        host: NodeId,
    ) -> Result<(), LinkError> {
        let ObjectData::Graph(graph) = &mut object.data else {
            return Err(LinkError::invariant(format!(
                "{} is not a graph",
                object.id
            )));
        };
        for graph_item in &mut graph.graph_items {
            graph_item.item = substitute_item_ref(store, graph_item.item, host)?;
        }
        if let Some(ymin) = graph.ymin_item {
            graph.ymin_item = Some(substitute_item_ref(store, ymin, host)?);
        }
        if let Some(ymax) = graph.ymax_item {
            graph.ymax_item = Some(substitute_item_ref(store, ymax, host)?);
        }
        Ok(())
    }

    fn adoptable(
        &self,
        store: &dyn EntityStore,
        adapted: &TemplateObject,
        existing: &TemplateObject,
    ) -> Result<bool, LinkError> {
        matcher::graph_content_matches(store, adapted, existing)
    }
}

/// The adapter serving a given object kind
pub fn adapter_for(kind: ObjectKind) -> &'static dyn ObjectAdapter {
    match kind {
        ObjectKind::Application => &ApplicationAdapter,
        ObjectKind::Item => &ItemAdapter,
        ObjectKind::Trigger => &TriggerAdapter,
        ObjectKind::Graph => &GraphAdapter,
    }
}
