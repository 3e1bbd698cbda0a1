//! Node tree layout, subtree validation, merge and stability tracking for the tree mesh.
//!
//! A node only ever stores one [`NodeTree`](mesh_wire::NodeTree) per link: the
//! subtree the peer last reported. This crate assembles those snapshots into a
//! [`Layout`], answers routing and membership questions about it, and decides
//! whether an incoming snapshot may be accepted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod layout;
pub mod stability;

pub use error::TopologyError;
pub use layout::*;
pub use stability::{Stability, MAX_STABILITY, STABILITY_STEP};
