//! Node tree: a node and everything reachable below it.
//!
//! Encoded pre-order:
//!
//! ```text
//! +-------------+-----------+----------------+----------------------+
//! | u32 node_id | u8 root   | u16 child_cnt  | child[0..child_cnt)  |
//! +-------------+-----------+----------------+----------------------+
//! ```
//!
//! Trees deeper than [`MAX_TREE_DEPTH`] are refused on both ends, which bounds
//! a mesh to chains of that many hops.

use crate::codec::{Reader, WireFormat};
use crate::WireError;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Smallest possible encoded subtree (a leaf)
pub const MIN_TREE_SIZE: usize = 7;

/// Deepest tree encoded or accepted from a peer
pub const MAX_TREE_DEPTH: usize = 128;

/// Spanning-tree view rooted at one node
///
/// A `node_id` of 0 means the node is not known yet. Equality is deep and
/// order-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTree {
    /// Node identifier
    #[serde(rename = "nodeId")]
    pub node_id: u32,
    /// Whether this node is the designated root
    #[serde(default, skip_serializing_if = "is_false")]
    pub root: bool,
    /// Child subtrees in link order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<NodeTree>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl NodeTree {
    /// A leaf node
    pub fn new(node_id: u32, root: bool) -> Self {
        Self {
            node_id,
            root,
            subs: Vec::new(),
        }
    }

    /// A node with the given children
    pub fn with_subs(node_id: u32, root: bool, subs: Vec<NodeTree>) -> Self {
        Self {
            node_id,
            root,
            subs,
        }
    }

    /// Whether `node_id` is this node or any descendant
    pub fn contains(&self, node_id: u32) -> bool {
        self.node_id == node_id || self.subs.iter().any(|s| s.contains(node_id))
    }

    /// Whether the root is this node or any descendant
    pub fn contains_root(&self) -> bool {
        self.root || self.subs.iter().any(NodeTree::contains_root)
    }

    /// Number of known nodes, this one included
    pub fn size(&self) -> usize {
        let own = usize::from(self.node_id != 0);
        own + self.subs.iter().map(NodeTree::size).sum::<usize>()
    }

    /// Node ids in pre-order
    pub fn node_ids(&self) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.subs.len() + 1);
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<u32>) {
        if self.node_id != 0 {
            ids.push(self.node_id);
        }
        for sub in &self.subs {
            sub.collect_ids(ids);
        }
    }

    /// Longest path from this node down to a leaf, in nodes
    pub fn depth(&self) -> usize {
        1 + self.subs.iter().map(NodeTree::depth).max().unwrap_or(0)
    }

    /// Whether nothing is known about this tree
    pub fn is_empty(&self) -> bool {
        self.node_id == 0 && self.subs.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.node_id = 0;
        self.root = false;
        self.subs.clear();
    }

    /// JSON rendering, `{"nodeId":1,"root":true,"subs":[...]}`
    pub fn to_json(&self, pretty: bool) -> String {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        rendered.unwrap_or_default()
    }

    fn encode_at_depth(&self, buf: &mut BytesMut, depth: usize) -> Result<(), WireError> {
        if depth > MAX_TREE_DEPTH {
            return Err(WireError::malformed(format!(
                "node tree deeper than {MAX_TREE_DEPTH}"
            )));
        }

        let count = u16::try_from(self.subs.len()).map_err(|_| WireError::Size(self.subs.len()))?;
        buf.put_u32_le(self.node_id);
        buf.put_u8(u8::from(self.root));
        buf.put_u16_le(count);
        for sub in &self.subs {
            sub.encode_at_depth(buf, depth + 1)?;
        }
        Ok(())
    }

    fn decode_at_depth(reader: &mut Reader<'_>, depth: usize) -> Result<Self, WireError> {
        if depth > MAX_TREE_DEPTH {
            return Err(WireError::malformed(format!(
                "node tree deeper than {MAX_TREE_DEPTH}"
            )));
        }

        let node_id = reader.u32()?;
        let root = reader.bool()?;
        let count = reader.u16()? as usize;

        // Every child needs at least a leaf's worth of bytes
        if count * MIN_TREE_SIZE > reader.remaining() {
            return Err(WireError::TruncatedFrame {
                offset: reader.offset(),
                needed: count * MIN_TREE_SIZE,
                available: reader.remaining(),
            });
        }

        let mut subs = Vec::with_capacity(count);
        for _ in 0..count {
            subs.push(Self::decode_at_depth(reader, depth + 1)?);
        }

        Ok(Self {
            node_id,
            root,
            subs,
        })
    }
}

impl WireFormat for NodeTree {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.encode_at_depth(buf, 1)
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        Self::decode_at_depth(reader, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};

    fn sample() -> NodeTree {
        // 1 -> (2 -> (3 -> (4 -> 5)), 6)
        NodeTree::with_subs(
            1,
            true,
            vec![
                NodeTree::with_subs(
                    2,
                    false,
                    vec![NodeTree::with_subs(
                        3,
                        false,
                        vec![NodeTree::with_subs(4, false, vec![NodeTree::new(5, false)])],
                    )],
                ),
                NodeTree::new(6, false),
            ],
        )
    }

    #[test]
    fn test_roundtrip_deep_tree() {
        let tree = sample();
        assert_eq!(tree.depth(), 5);

        let mut buf = BytesMut::new();
        let end = serialize(&tree, &mut buf, 0).unwrap();
        assert_eq!(end, 6 * MIN_TREE_SIZE);

        let (decoded, offset) = deserialize::<NodeTree>(&buf, 0).unwrap();
        assert_eq!(offset, end);
        assert_eq!(decoded, tree);
    }

    #[test]
    fn test_roundtrip_leaf() {
        let leaf = NodeTree::new(42, false);
        let mut buf = BytesMut::new();
        serialize(&leaf, &mut buf, 0).unwrap();
        assert_eq!(&buf[..], &[42, 0, 0, 0, 0, 0, 0]);
        assert_eq!(deserialize::<NodeTree>(&buf, 0).unwrap().0, leaf);
    }

    #[test]
    fn test_queries() {
        let tree = sample();
        assert!(tree.contains(5));
        assert!(!tree.contains(7));
        assert!(tree.contains_root());
        assert!(!tree.subs[0].contains_root());
        assert_eq!(tree.size(), 6);
        assert_eq!(tree.node_ids(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_equality_is_order_sensitive() {
        let two = NodeTree::new(2, false);
        let three = NodeTree::new(3, false);
        let a = NodeTree::with_subs(1, false, vec![two.clone(), three.clone()]);
        let b = NodeTree::with_subs(1, false, vec![three, two]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_child_count_beyond_buffer() {
        // Leaf header claiming 1000 children with nothing after it
        let buf = [1u8, 0, 0, 0, 0, 0xE8, 0x03];
        assert!(matches!(
            deserialize::<NodeTree>(&buf, 0),
            Err(WireError::TruncatedFrame { .. })
        ));
    }

    fn chain_of_depth(depth: u32) -> NodeTree {
        let mut tree = NodeTree::new(1, false);
        for id in 2..=depth {
            tree = NodeTree::with_subs(id, false, vec![tree]);
        }
        tree
    }

    #[test]
    fn test_depth_limit() {
        let deepest = chain_of_depth(MAX_TREE_DEPTH as u32);
        let mut buf = BytesMut::new();
        serialize(&deepest, &mut buf, 0).unwrap();
        assert_eq!(deserialize::<NodeTree>(&buf, 0).unwrap().0, deepest);

        let too_deep = chain_of_depth(MAX_TREE_DEPTH as u32 + 1);
        let mut buf = BytesMut::new();
        assert!(matches!(
            serialize(&too_deep, &mut buf, 0),
            Err(WireError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_refuses_deep_tree() {
        // Hand-built chain one level past the limit
        let mut buf = BytesMut::new();
        for id in 0..MAX_TREE_DEPTH as u32 {
            buf.put_u32_le(id + 1);
            buf.put_u8(0);
            buf.put_u16_le(1);
        }
        buf.put_u32_le(MAX_TREE_DEPTH as u32 + 1);
        buf.put_u8(0);
        buf.put_u16_le(0);
        assert!(matches!(
            deserialize::<NodeTree>(&buf, 0),
            Err(WireError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_json() {
        let tree = NodeTree::with_subs(1, true, vec![NodeTree::new(2, false)]);
        assert_eq!(
            tree.to_json(false),
            r#"{"nodeId":1,"root":true,"subs":[{"nodeId":2}]}"#
        );
        let parsed: NodeTree = serde_json::from_str(&tree.to_json(true)).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn test_clear() {
        let mut tree = sample();
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
    }
}
