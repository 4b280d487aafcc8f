//! Shared fixtures for integration tests. Included from the files under
//! `tests/` via `#[path]`; not part of the library itself.
#![allow(dead_code)]

use templink::{
    Actor, EngineConfig, Graph, GraphItem, Item, LinkEngine, LinkRequest, MemoryStore, NodeId,
    NodeStatus, ObjectData, ObjectFlags, ObjectId, TemplateObject, Trigger,
};

pub fn admin() -> Actor {
    Actor::new("admin")
}

pub fn engine(store: MemoryStore) -> LinkEngine {
    LinkEngine::new(Box::new(store), EngineConfig::default())
}

pub fn link(engine: &mut LinkEngine, template: NodeId, host: NodeId) {
    engine
        .link(&admin(), &LinkRequest::new(vec![template], vec![host]))
        .unwrap();
}

pub fn item(owner: NodeId, key: &str) -> TemplateObject {
    TemplateObject::new(
        owner,
        ObjectFlags::Normal,
        ObjectData::Item(Item::new(key, key)),
    )
}

pub fn rule(owner: NodeId, key: &str) -> TemplateObject {
    TemplateObject::new(
        owner,
        ObjectFlags::Rule,
        ObjectData::Item(Item::new(key, key)),
    )
}

pub fn prototype(owner: NodeId, key: &str, rule: ObjectId) -> TemplateObject {
    let mut data = Item::new(key, key);
    data.rule_ref = Some(rule);
    TemplateObject::new(owner, ObjectFlags::Prototype, ObjectData::Item(data))
}

pub fn trigger(owner: NodeId, name: &str, expression: &str) -> TemplateObject {
    TemplateObject::new(
        owner,
        ObjectFlags::Normal,
        ObjectData::Trigger(Trigger::new(name, expression)),
    )
}

pub fn graph(owner: NodeId, name: &str, items: &[ObjectId]) -> TemplateObject {
    let graph_items = items
        .iter()
        .enumerate()
        .map(|(i, id)| GraphItem::new(*id, "1A7C11", i as u32))
        .collect();
    TemplateObject::new(
        owner,
        ObjectFlags::Normal,
        ObjectData::Graph(Graph::new(name, graph_items)),
    )
}

pub fn template_node(store: &mut MemoryStore, name: &str) -> NodeId {
    store.add_node(name, NodeStatus::Template)
}

pub fn host_node(store: &mut MemoryStore, name: &str) -> NodeId {
    store.add_node(name, NodeStatus::Monitored)
}
