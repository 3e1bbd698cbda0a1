//! Topology validation errors.

use thiserror::Error;

/// Reasons an incoming subtree is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Accepting the subtree would create a routing cycle
    #[error("cyclic topology through node {node_id}")]
    CyclicTopology {
        /// Node that would be reachable twice
        node_id: u32,
    },

    /// Another link already reaches this node
    #[error("duplicate link to node {node_id}")]
    DuplicateLink {
        /// Node claimed by both links
        node_id: u32,
    },

    /// The peer reported a different identity than the one it announced
    #[error("link belongs to node {expected}, subtree describes {reported}")]
    IdentityMismatch {
        /// Identity already known for the link
        expected: u32,
        /// Identity in the subtree
        reported: u32,
    },
}
