//! # Template Object Matcher
//!
//! Finds the identity-equivalent object already present on a target host
//! for a given template-owned object. A copy carrying the parent's
//! `template_ref` back-reference always wins; otherwise each kind falls
//! back to its natural key: items match on their key string, applications
//! on name, triggers on a host-normalized expression signature, and
//! graphs on case-insensitive name plus item-key multiset. More than one
//! host-local candidate for one key is a data-integrity violation and
//! surfaces as an error instead of an arbitrary pick.

use crate::error::LinkError;
use crate::model::{NodeId, ObjectData, ObjectId, TemplateObject};
use crate::store::EntityStore;

/// Find the host-local object identity-equivalent to `parent`.
///
/// Only objects of the parent's `(kind, flags)` class are considered;
/// propagation preserves the discriminator, so a prototype never matches
/// a normal object.
pub fn find_match(
    store: &dyn EntityStore,
    parent: &TemplateObject,
    host: NodeId,
) -> Result<Option<TemplateObject>, LinkError> {
    let candidates = store.get_objects(host, parent.kind(), Some(parent.flags));

    // a copy already inherited from this exact ancestor is the match,
    // whatever its current natural key looks like; an edited parent must
    // update its copy in place, never spawn a second one
    if parent.id.is_assigned() {
        if let Some(copy) = candidates
            .iter()
            .find(|c| c.template_ref == Some(parent.id))
        {
            return Ok(Some(copy.clone()));
        }
    }

    let matched: Vec<TemplateObject> = match &parent.data {
        ObjectData::Application(app) => candidates
            .into_iter()
            .filter(|c| c.as_application().map_or(false, |a| a.name == app.name))
            .collect(),
        ObjectData::Item(item) => candidates
            .into_iter()
            .filter(|c| c.as_item().map_or(false, |i| i.key == item.key))
            .collect(),
        ObjectData::Trigger(trigger) => {
            let signature = normalize_expression(&trigger.expression);
            candidates
                .into_iter()
                .filter(|c| {
                    c.as_trigger()
                        .map_or(false, |t| normalize_expression(&t.expression) == signature)
                })
                .collect()
        }
        ObjectData::Graph(graph) => {
            let by_name: Vec<TemplateObject> = candidates
                .into_iter()
                .filter(|c| {
                    c.as_graph()
                        .map_or(false, |g| g.name.eq_ignore_ascii_case(&graph.name))
                })
                .collect();
            let mut identical = Vec::new();
            for candidate in &by_name {
                if graph_content_matches(store, parent, candidate)? {
                    identical.push(candidate.clone());
                }
            }
            // a name match with a different item set is still reported;
            // the caller decides between adoption and collision
            if identical.is_empty() {
                by_name
            } else {
                identical
            }
        }
    };

    if matched.len() > 1 {
        return Err(LinkError::invariant(format!(
            "{} \"{}\" occurs {} times on {host}",
            parent.kind(),
            natural_key(parent),
            matched.len()
        )));
    }
    Ok(matched.into_iter().next())
}

/// The display form of an object's natural identity key, used in error
/// messages
pub fn natural_key(object: &TemplateObject) -> String {
    match &object.data {
        ObjectData::Application(app) => app.name.clone(),
        ObjectData::Item(item) => item.key.clone(),
        ObjectData::Trigger(trigger) => trigger.name.clone(),
        ObjectData::Graph(graph) => graph.name.clone(),
    }
}

/// The item-set signature of a graph: every plotted item's natural key,
/// as a sorted multiset, plus the Y-axis reference item keys when
/// configured. Two graphs with equal signatures plot the same data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSignature {
    keys: Vec<String>,
    ymin: Option<String>,
    ymax: Option<String>,
}

/// Resolve a graph's item references to their keys.
///
/// Fails as an invariant violation when a graph item references an object
/// that is missing from the store or is not an item.
pub fn graph_signature(
    store: &dyn EntityStore,
    object: &TemplateObject,
) -> Result<GraphSignature, LinkError> {
    let graph = object
        .as_graph()
        .ok_or_else(|| LinkError::invariant(format!("{} is not a graph", object.id)))?;

    let resolve = |id: ObjectId| -> Result<String, LinkError> {
        store
            .get_object(id)
            .as_ref()
            .and_then(|o| o.as_item())
            .map(|i| i.key.clone())
            .ok_or_else(|| {
                LinkError::invariant(format!(
                    "graph \"{}\" ({}) references missing item {id}",
                    graph.name, object.id
                ))
            })
    };

    let mut keys = Vec::with_capacity(graph.graph_items.len());
    for graph_item in &graph.graph_items {
        keys.push(resolve(graph_item.item)?);
    }
    keys.sort();

    Ok(GraphSignature {
        keys,
        ymin: graph.ymin_item.map(resolve).transpose()?,
        ymax: graph.ymax_item.map(resolve).transpose()?,
    })
}

/// Whether two graphs plot the same item-key multiset, Y-axis references
/// included. Together with the case-insensitive name this is a graph's
/// full identity; a name match with a different item set is a conflict,
/// not an equivalent object.
pub fn graph_content_matches(
    store: &dyn EntityStore,
    a: &TemplateObject,
    b: &TemplateObject,
) -> Result<bool, LinkError> {
    Ok(graph_signature(store, a)? == graph_signature(store, b)?)
}

/// Item keys referenced by a trigger expression, in order of appearance.
///
/// References have the form `{<host>:<key>.<func>(<args>)}`; the function
/// is the last dot-separated segment before the argument list.
pub fn expression_references(expression: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for token in expression_tokens(expression) {
        if let Some((_, rest)) = split_host(token) {
            keys.push(reference_key(rest).to_string());
        }
    }
    keys
}

/// Canonical form of an expression with host qualifiers stripped, so the
/// same expression inherited onto different hosts compares equal
pub fn normalize_expression(expression: &str) -> String {
    rewrite_references(expression, |_, rest| format!("{{{rest}}}"))
}

/// Rewrite every reference's host qualifier to `host_name`
pub fn retarget_expression(expression: &str, host_name: &str) -> String {
    rewrite_references(expression, |_, rest| format!("{{{host_name}:{rest}}}"))
}

fn rewrite_references(expression: &str, rewrite: impl Fn(&str, &str) -> String) -> String {
    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let token = &rest[open + 1..open + close];
        match split_host(token) {
            Some((host, reference)) => out.push_str(&rewrite(host, reference)),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

fn expression_tokens(expression: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = expression;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        tokens.push(&rest[open + 1..open + close]);
        rest = &rest[open + close + 1..];
    }
    tokens
}

fn split_host(token: &str) -> Option<(&str, &str)> {
    token.split_once(':')
}

/// The item key part of `<key>.<func>(<args>)`: everything before the
/// last dot preceding the argument list. Keys themselves may contain dots
/// (`agent.ping`).
fn reference_key(reference: &str) -> &str {
    let call_start = reference.find('(').unwrap_or(reference.len());
    match reference[..call_start].rfind('.') {
        Some(dot) => &reference[..dot],
        None => &reference[..call_start],
    }
}
