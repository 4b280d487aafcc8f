//! Unlink behavior through the facade: detach semantics, clear cascades
//! and the spanning-trigger guard.

#[path = "../src/test_support.rs"]
mod test_support;

use templink::{
    EntityStore, LinkError, LinkRequest, MemoryStore, ObjectData, ObjectFlags, ObjectKind,
    TemplateObject, UnlinkRequest,
};
use test_support::*;

#[test]
fn test_detached_copies_become_independent() {
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template OS");
    let host = host_node(&mut store, "web-1");
    store.insert_object(item(template, "agent.ping"));

    let mut engine = engine(store);
    link(&mut engine, template, host);
    engine
        .unlink(
            &admin(),
            &UnlinkRequest::new(vec![template], vec![host], false),
        )
        .unwrap();

    // the copy survives as a host-local object
    let copies = engine.store().get_objects(host, ObjectKind::Item, None);
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].template_ref, None);

    // further template edits no longer reach it
    let mut edited = engine
        .store()
        .get_objects(template, ObjectKind::Item, None)[0]
        .clone();
    if let ObjectData::Item(i) = &mut edited.data {
        i.delay = 1;
    }
    engine.store_mut().update_object(edited).unwrap();
    engine.propagate(&admin(), template).unwrap();
    let copy = &engine.store().get_objects(host, ObjectKind::Item, None)[0];
    assert_eq!(copy.as_item().unwrap().delay, 60);
}

#[test]
fn test_clear_removes_the_whole_inherited_set() {
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template OS");
    let host = host_node(&mut store, "web-1");
    let ping = store.insert_object(item(template, "agent.ping"));
    store.insert_object(trigger(
        template,
        "Agent down",
        "{Template OS:agent.ping.last(0)}=0",
    ));
    store.insert_object(graph(template, "G", &[ping]));

    let mut engine = engine(store);
    link(&mut engine, template, host);
    let report = engine
        .unlink(
            &admin(),
            &UnlinkRequest::new(vec![template], vec![host], true),
        )
        .unwrap();
    assert_eq!(report.deleted, 3);
    for kind in [ObjectKind::Item, ObjectKind::Trigger, ObjectKind::Graph] {
        assert!(engine.store().get_objects(host, kind, None).is_empty());
    }
}

#[test]
fn test_clear_cascades_rule_prototypes_and_discovered() {
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template Net");
    let host = host_node(&mut store, "router-1");
    let discovery = store.insert_object(rule(template, "net.if.discovery"));
    store.insert_object(prototype(template, "net.if.in[{#IFNAME}]", discovery));

    let mut engine = engine(store);
    link(&mut engine, template, host);

    // simulate a discovery run instantiating the prototype
    let host_prototype = engine
        .store()
        .get_objects(host, ObjectKind::Item, Some(ObjectFlags::Prototype))[0]
        .clone();
    let mut discovered = item(host, "net.if.in[eth0]");
    discovered.flags = ObjectFlags::Discovered;
    discovered.template_ref = Some(host_prototype.id);
    engine.store_mut().insert_object(discovered);

    let report = engine
        .unlink(
            &admin(),
            &UnlinkRequest::new(vec![template], vec![host], true),
        )
        .unwrap();
    assert_eq!(report.deleted, 3);
    assert!(engine
        .store()
        .get_objects(host, ObjectKind::Item, None)
        .is_empty());
    // the template's own definitions are untouched
    assert_eq!(
        engine.store().get_objects(template, ObjectKind::Item, None).len(),
        2
    );
}

#[test]
fn test_unlink_scope_is_per_template() {
    let mut store = MemoryStore::new();
    let os = template_node(&mut store, "Template OS");
    let db = template_node(&mut store, "Template DB");
    let host = host_node(&mut store, "web-1");
    store.insert_object(item(os, "agent.ping"));
    store.insert_object(item(db, "db.sessions"));

    let mut engine = engine(store);
    link(&mut engine, os, host);
    link(&mut engine, db, host);
    engine
        .unlink(&admin(), &UnlinkRequest::new(vec![os], vec![host], true))
        .unwrap();

    let remaining = engine.store().get_objects(host, ObjectKind::Item, None);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].as_item().unwrap().key, "db.sessions");
    // the other link row survives
    assert_eq!(engine.store().get_linked_hosts(db), vec![host]);
}

#[test]
fn test_spanning_trigger_requires_clear() {
    let mut store = MemoryStore::new();
    let os = template_node(&mut store, "Template OS");
    let db = template_node(&mut store, "Template DB");
    let host = host_node(&mut store, "web-1");
    store.insert_object(item(os, "agent.ping"));
    store.insert_object(item(db, "db.sessions"));
    store.insert_object(trigger(
        os,
        "Mixed",
        "{Template OS:agent.ping.last(0)}=0 & {Template OS:db.sessions.last(0)}>100",
    ));

    let mut engine = engine(store);
    link(&mut engine, db, host);
    link(&mut engine, os, host);

    let err = engine
        .unlink(&admin(), &UnlinkRequest::new(vec![os], vec![host], false))
        .unwrap_err();
    assert!(matches!(err, LinkError::DependentTriggerBlocksUnlink { .. }));
    // nothing was detached by the failed call
    let copies = engine.store().get_objects(host, ObjectKind::Item, None);
    assert!(copies.iter().all(|c| c.template_ref.is_some()));

    engine
        .unlink(&admin(), &UnlinkRequest::new(vec![os], vec![host], true))
        .unwrap();
    let remaining = engine.store().get_objects(host, ObjectKind::Item, None);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].as_item().unwrap().key, "db.sessions");
}

#[test]
fn test_unlink_without_host_set_severs_everything() {
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template OS");
    let h1 = host_node(&mut store, "web-1");
    let h2 = host_node(&mut store, "web-2");
    store.insert_object(item(template, "agent.ping"));

    let mut engine = engine(store);
    link(&mut engine, template, h1);
    link(&mut engine, template, h2);

    let report = engine
        .unlink(&admin(), &UnlinkRequest::all_hosts(vec![template], true))
        .unwrap();
    assert_eq!(report.deleted, 2);
    assert!(engine.store().get_linked_hosts(template).is_empty());
}

#[test]
fn test_relink_after_clear_recreates_copies() {
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template OS");
    let host = host_node(&mut store, "web-1");
    store.insert_object(item(template, "agent.ping"));

    let mut engine = engine(store);
    link(&mut engine, template, host);
    engine
        .unlink(
            &admin(),
            &UnlinkRequest::new(vec![template], vec![host], true),
        )
        .unwrap();
    let report = engine
        .link(&admin(), &LinkRequest::new(vec![template], vec![host]))
        .unwrap();
    assert_eq!(report.created, 1);
}

#[test]
fn test_relink_after_detach_adopts_the_orphan() {
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template OS");
    let host = host_node(&mut store, "web-1");
    store.insert_object(item(template, "agent.ping"));

    let mut engine = engine(store);
    link(&mut engine, template, host);
    engine
        .unlink(
            &admin(),
            &UnlinkRequest::new(vec![template], vec![host], false),
        )
        .unwrap();
    let report = engine
        .link(&admin(), &LinkRequest::new(vec![template], vec![host]))
        .unwrap();
    assert_eq!(report.adopted, 1);
    assert_eq!(report.created, 0);
    assert_eq!(engine.store().get_objects(host, ObjectKind::Item, None).len(), 1);
}

#[test]
fn test_clear_unlink_drops_cross_references() {
    // a host-local trigger depending on an inherited one loses the edge
    let mut store = MemoryStore::new();
    let template = template_node(&mut store, "Template OS");
    let host = host_node(&mut store, "web-1");
    store.insert_object(item(template, "agent.ping"));
    store.insert_object(trigger(
        template,
        "Agent down",
        "{Template OS:agent.ping.last(0)}=0",
    ));

    let mut engine = engine(store);
    link(&mut engine, template, host);

    let inherited = engine
        .store()
        .get_objects(host, ObjectKind::Trigger, None)[0]
        .clone();
    let mut local = trigger(host, "Local check", "{web-1:local.heartbeat.last(0)}=0");
    if let ObjectData::Trigger(t) = &mut local.data {
        t.dependencies = vec![inherited.id];
    }
    let local_id = engine.store_mut().insert_object(local);

    engine
        .unlink(
            &admin(),
            &UnlinkRequest::new(vec![template], vec![host], true),
        )
        .unwrap();
    let local: TemplateObject = engine.store().get_object(local_id).unwrap();
    assert!(local.as_trigger().unwrap().dependencies.is_empty());
}
