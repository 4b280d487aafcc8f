//! # Error Types
//!
//! The linkage engine's error kinds. Every variant carries enough context
//! (template id, host id, object key) to render a precise user-facing
//! message; none of them represent transient conditions worth retrying.

use crate::model::NodeId;
use std::fmt;

/// An error raised by linkage validation, propagation or unlink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The proposed links would close a cycle in the template graph
    CircularLinkage {
        /// The offending chain; first and last entries are the same node
        path: Vec<NodeId>,
    },
    /// A host would inherit the same template through two distinct paths.
    /// `host == None` means the same template was named twice in one
    /// link request.
    DuplicateLinkage {
        template: NodeId,
        host: Option<NodeId>,
    },
    /// An object being propagated references an item or upstream trigger
    /// with no equivalent on the target host
    MissingDependency { host: NodeId, key: String },
    /// The host already has an equivalently keyed object inherited from a
    /// different template
    ForeignTemplateConflict {
        host: NodeId,
        key: String,
        template: NodeId,
    },
    /// The host has a locally owned object with the same natural key but
    /// different content
    NameCollision { host: NodeId, key: String },
    /// A trigger spans items of the unlinking template and of a template
    /// that remains linked; unlinking without clear would strand it
    DependentTriggerBlocksUnlink { host: NodeId, trigger: String },
    /// Defensive: the store contradicts an invariant the engine relies on
    LinkageInvariantViolated { detail: String },
    /// The actor lacks write permission on a target node
    PermissionDenied { actor: String, node: NodeId },
}

impl LinkError {
    /// Shorthand for the defensive invariant-violation variant
    pub fn invariant(detail: impl Into<String>) -> Self {
        LinkError::LinkageInvariantViolated {
            detail: detail.into(),
        }
    }

    /// Wrap a store-level failure; the engine only mutates objects it has
    /// just read, so any store rejection is an invariant violation
    pub fn from_store(err: anyhow::Error) -> Self {
        LinkError::LinkageInvariantViolated {
            detail: format!("store failure: {err}"),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::CircularLinkage { path } => {
                let chain = path
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                write!(f, "circular template linkage ({chain}) cannot be created")
            }
            LinkError::DuplicateLinkage {
                template,
                host: Some(host),
            } => write!(
                f,
                "{host} would inherit template {template} through more than one linkage path"
            ),
            LinkError::DuplicateLinkage {
                template,
                host: None,
            } => write!(f, "template {template} named more than once in a single link request"),
            LinkError::MissingDependency { host, key } => {
                write!(f, "\"{key}\" required for propagation does not exist on {host}")
            }
            LinkError::ForeignTemplateConflict {
                host,
                key,
                template,
            } => write!(
                f,
                "\"{key}\" on {host} is already inherited from template {template}"
            ),
            LinkError::NameCollision { host, key } => write!(
                f,
                "\"{key}\" already exists on {host} with different content"
            ),
            LinkError::DependentTriggerBlocksUnlink { host, trigger } => write!(
                f,
                "trigger \"{trigger}\" on {host} references items of a template that remains linked"
            ),
            LinkError::LinkageInvariantViolated { detail } => {
                write!(f, "linkage invariant violated: {detail}")
            }
            LinkError::PermissionDenied { actor, node } => {
                write!(f, "actor \"{actor}\" has no write permission on {node}")
            }
        }
    }
}

impl std::error::Error for LinkError {}
