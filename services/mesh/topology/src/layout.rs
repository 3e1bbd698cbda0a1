//! Combined view of this node and every link's last reported subtree.

use mesh_wire::NodeTree;

/// One link's contribution to the layout
#[derive(Debug, Clone, Copy)]
pub struct Branch<'a, K> {
    /// Link the subtree was reported on
    pub link: K,
    /// Last subtree reported by that link's peer
    pub tree: &'a NodeTree,
}

/// This node plus the subtree behind each link
///
/// Borrowed from the link set for the duration of one query; never stored.
#[derive(Debug, Clone)]
pub struct Layout<'a, K> {
    node_id: u32,
    root: bool,
    branches: Vec<Branch<'a, K>>,
}

/// Result of replacing a stored subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The new subtree differs from the stored one
    Changed,
    /// Structurally identical to what was stored
    Unchanged,
}

impl<'a, K: Copy + PartialEq> Layout<'a, K> {
    /// Layout with no links
    pub fn new(node_id: u32, root: bool) -> Self {
        Self {
            node_id,
            root,
            branches: Vec::new(),
        }
    }

    /// Add the subtree reported on `link`
    pub fn push(&mut self, link: K, tree: &'a NodeTree) {
        self.branches.push(Branch { link, tree });
    }

    /// Local node id
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Whether this node is the designated root
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// All branches in link order
    pub fn branches(&self) -> &[Branch<'a, K>] {
        &self.branches
    }

    fn branch(&self, link: K) -> Option<&Branch<'a, K>> {
        self.branches.iter().find(|b| b.link == link)
    }

    fn others(&self, link: K) -> impl Iterator<Item = &Branch<'a, K>> {
        self.branches.iter().filter(move |b| b.link != link)
    }
}

// Include implementation
mod sync;
pub use sync::merge_subtree;
