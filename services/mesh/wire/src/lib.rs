//! Length-prefixed framing, protocol header, package and node-tree encoding for the tree mesh.
//!
//! This crate turns packages into bytes and back. Everything here is pure:
//! no sockets, no clocks, no shared state.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+-----------------------------+
//! | u32 frame_len        | length of bytes that follow |
//! +----------------------+-----------------------------+
//! | u16 type             | package type code           |
//! +----------------------+-----------------------------+
//! | u16 routing          | neighbour / single / bcast  |
//! +----------------------+-----------------------------+
//! | u32 dest             | destination node id         |
//! +----------------------+-----------------------------+
//! | payload              | typed by `type`             |
//! +----------------------+-----------------------------+
//! ```
//!
//! All integers are little-endian and packed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod package;
pub mod tree;

// Re-export main types
pub use codec::{deserialize, put_string, serialize, Reader, WireFormat};
pub use error::WireError;
pub use frame::{
    encode_frame, encode_package, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
pub use header::{ProtocolHeader, RoutingMode, HEADER_SIZE};
pub use package::{
    MeshIdAnnounce, NodeSync, Package, Payload, TextMessage, TimeSync, TimeSyncKind,
    TimeSyncMessage, UserPackage, TYPE_BROADCAST, TYPE_MESH_ID, TYPE_NODE_SYNC_REPLY,
    TYPE_NODE_SYNC_REQUEST, TYPE_SINGLE, TYPE_TIME_DELAY, TYPE_TIME_SYNC, TYPE_USER_MIN,
};
pub use tree::{NodeTree, MAX_TREE_DEPTH};
