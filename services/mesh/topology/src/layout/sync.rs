//! Layout queries and subtree validation.

use super::{Layout, MergeOutcome};
use crate::TopologyError;
use mesh_wire::NodeTree;
use std::collections::HashSet;
use tracing::debug;

impl<'a, K: Copy + PartialEq> Layout<'a, K> {
    /// Combined tree: this node with every known branch below it
    pub fn as_node_tree(&self) -> NodeTree {
        self.assemble(None)
    }

    /// Combined tree without the branch behind `link`, as sent to that link's peer
    pub fn as_node_tree_excluding(&self, link: K) -> NodeTree {
        self.assemble(Some(link))
    }

    fn assemble(&self, exclude: Option<K>) -> NodeTree {
        let subs = self
            .branches
            .iter()
            .filter(|b| Some(b.link) != exclude && b.tree.node_id != 0)
            .map(|b| b.tree.clone())
            .collect();
        NodeTree::with_subs(self.node_id, self.root, subs)
    }

    /// Link whose subtree contains `dest`
    pub fn route_to(&self, dest: u32) -> Option<K> {
        if dest == 0 {
            return None;
        }
        self.branches
            .iter()
            .find(|b| b.tree.contains(dest))
            .map(|b| b.link)
    }

    /// Whether `node_id` is this node or reachable through any link
    pub fn contains(&self, node_id: u32) -> bool {
        node_id != 0 && (node_id == self.node_id || self.route_to(node_id).is_some())
    }

    /// Whether the root is this node or reachable through any link
    pub fn contains_root(&self) -> bool {
        self.root || self.branches.iter().any(|b| b.tree.contains_root())
    }

    /// Known node ids in link order
    pub fn node_ids(&self, include_self: bool) -> Vec<u32> {
        let mut ids = Vec::new();
        if include_self {
            ids.push(self.node_id);
        }
        for branch in &self.branches {
            ids.extend(branch.tree.node_ids());
        }
        ids
    }

    /// Number of known nodes, this one included
    pub fn size(&self) -> usize {
        1 + self.branches.iter().map(|b| b.tree.size()).sum::<usize>()
    }

    /// Check that `tree`, reported on `link`, can be accepted.
    ///
    /// `known_remote` is the id already associated with the link, or 0. The
    /// subtree is refused when it changes the link's identity, mentions this
    /// node, repeats a node, or lists a descendant that is already reachable
    /// through another link.
    pub fn valid_subs(
        &self,
        link: K,
        known_remote: u32,
        tree: &NodeTree,
    ) -> Result<(), TopologyError> {
        if known_remote != 0 && tree.node_id != known_remote {
            return Err(TopologyError::IdentityMismatch {
                expected: known_remote,
                reported: tree.node_id,
            });
        }

        if tree.contains(self.node_id) {
            return Err(TopologyError::CyclicTopology {
                node_id: self.node_id,
            });
        }

        let ids = tree.node_ids();
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(*id) {
                return Err(TopologyError::CyclicTopology { node_id: *id });
            }
        }

        for id in ids.iter().filter(|id| **id != tree.node_id) {
            if self.others(link).any(|b| b.tree.contains(*id)) {
                debug!(node_id = id, "subtree node already reachable through another link");
                return Err(TopologyError::CyclicTopology { node_id: *id });
            }
        }

        Ok(())
    }

    /// Refuse a first sync from `node_id` if another link already reaches it
    pub fn check_duplicate(&self, link: K, node_id: u32) -> Result<(), TopologyError> {
        if self.others(link).any(|b| b.tree.contains(node_id)) {
            return Err(TopologyError::DuplicateLink { node_id });
        }
        Ok(())
    }

    /// Whether this node should take its clock from the peer behind `link`.
    ///
    /// The root never adopts. A node adopts from the side holding the root,
    /// otherwise from the larger side; on equal sizes the lower node id adopts.
    pub fn adopts_time_from(&self, link: K) -> bool {
        if self.root {
            return false;
        }
        let Some(branch) = self.branch(link) else {
            return false;
        };
        if branch.tree.contains_root() {
            return true;
        }
        if self.others(link).any(|b| b.tree.contains_root()) {
            return false;
        }

        let ours = 1 + self.others(link).map(|b| b.tree.size()).sum::<usize>();
        let theirs = branch.tree.size();
        if ours != theirs {
            return ours < theirs;
        }
        self.node_id < branch.tree.node_id
    }
}

/// Replace `stored` with `incoming`, reporting whether anything changed
pub fn merge_subtree(stored: &mut NodeTree, incoming: NodeTree) -> MergeOutcome {
    if *stored == incoming {
        MergeOutcome::Unchanged
    } else {
        *stored = incoming;
        MergeOutcome::Changed
    }
}
