//! # Linkage Graph Validator
//!
//! Validates a proposed set of template→host links against the persisted
//! link table. The combined graph must stay acyclic, and no node may
//! inherit the same ancestor template through two distinct paths
//! ("double linkage"). Pure validation, no side effects; the caller
//! persists links only after this check passes.

use crate::error::LinkError;
use crate::model::{Link, NodeId};
use rustc_hash::{FxHashMap, FxHashSet};

/// DFS marker state within one root's traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Validate the union of `new_links` and `existing_links`.
///
/// Duplicate `(template, host)` pairs within `new_links` are rejected
/// outright; the caller is expected to have dropped pairs that already
/// exist. On success the combined graph is a DAG in which every node is
/// reachable from any single root through at most one path.
pub fn validate_links(new_links: &[Link], existing_links: &[Link]) -> Result<(), LinkError> {
    let mut requested: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();
    for link in new_links {
        if !requested.insert((link.template, link.host)) {
            return Err(LinkError::DuplicateLinkage {
                template: link.template,
                host: Some(link.host),
            });
        }
    }

    // adjacency template -> hosts over the deduplicated union
    let mut graph: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
    let mut edges: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();
    let mut has_parent: FxHashSet<NodeId> = FxHashSet::default();
    let mut nodes: FxHashSet<NodeId> = FxHashSet::default();
    for link in existing_links.iter().chain(new_links) {
        if edges.insert((link.template, link.host)) {
            graph.entry(link.template).or_default().push(link.host);
            has_parent.insert(link.host);
            nodes.insert(link.template);
            nodes.insert(link.host);
        }
    }
    for children in graph.values_mut() {
        children.sort();
    }

    // top templates: parents with no incoming edge
    let mut roots: Vec<NodeId> = graph
        .keys()
        .filter(|id| !has_parent.contains(id))
        .copied()
        .collect();
    roots.sort();

    let mut visited_any: FxHashSet<NodeId> = FxHashSet::default();
    for root in roots {
        walk_from_root(root, &graph, &mut visited_any)?;
    }

    // anything the roots never reached sits on a cycle with no entry point
    if visited_any.len() != nodes.len() {
        let mut orphans: Vec<NodeId> = nodes
            .iter()
            .filter(|id| !visited_any.contains(id))
            .copied()
            .collect();
        orphans.sort();
        return Err(LinkError::CircularLinkage {
            path: orphan_cycle_path(orphans[0], &graph, &visited_any),
        });
    }

    Ok(())
}

/// Iterative DFS from one root with a per-root marker map.
///
/// Revisiting an `OnStack` node closes a cycle; revisiting a `Done` node
/// means the node is reachable from this root through two distinct paths,
/// i.e. it would inherit the root's objects twice. The marker map is
/// fresh per root: the same node reached from two unrelated roots is an
/// ordinary multi-template host and stays legal.
fn walk_from_root(
    root: NodeId,
    graph: &FxHashMap<NodeId, Vec<NodeId>>,
    visited_any: &mut FxHashSet<NodeId>,
) -> Result<(), LinkError> {
    let mut marks: FxHashMap<NodeId, Mark> = FxHashMap::default();
    let mut path: Vec<NodeId> = vec![root];
    let mut frames: Vec<(NodeId, usize)> = vec![(root, 0)];
    marks.insert(root, Mark::OnStack);

    while let Some((node, cursor)) = frames.last_mut() {
        let node = *node;
        let children = graph.get(&node).map(Vec::as_slice).unwrap_or(&[]);
        if *cursor < children.len() {
            let child = children[*cursor];
            *cursor += 1;
            match marks.get(&child) {
                Some(Mark::OnStack) => {
                    let start = path.iter().position(|n| *n == child).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(child);
                    return Err(LinkError::CircularLinkage { path: cycle });
                }
                Some(Mark::Done) => {
                    return Err(LinkError::DuplicateLinkage {
                        template: root,
                        host: Some(child),
                    });
                }
                None => {
                    marks.insert(child, Mark::OnStack);
                    path.push(child);
                    frames.push((child, 0));
                }
            }
        } else {
            marks.insert(node, Mark::Done);
            visited_any.insert(node);
            path.pop();
            frames.pop();
        }
    }

    Ok(())
}

/// Reconstruct a representative path through an orphaned (rootless) cycle
/// for the error message.
fn orphan_cycle_path(
    start: NodeId,
    graph: &FxHashMap<NodeId, Vec<NodeId>>,
    visited_any: &FxHashSet<NodeId>,
) -> Vec<NodeId> {
    let mut path = vec![start];
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    seen.insert(start);
    let mut current = start;
    while let Some(next) = graph
        .get(&current)
        .and_then(|children| children.iter().find(|c| !visited_any.contains(c)))
    {
        path.push(*next);
        if !seen.insert(*next) {
            break;
        }
        current = *next;
    }
    path
}
