//! Routing decisions, handler registry and sequence ids for the tree mesh.
//!
//! The router never looks at the tree itself: it is handed a lookup that maps
//! a destination to the link whose subtree contains it. Dispatch goes through
//! a [`CallbackRegistry`] owned by the mesh instance, so several independent
//! meshes can share a process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod message_id;
pub mod router;

pub use callback::*;
pub use message_id::*;
pub use router::*;
