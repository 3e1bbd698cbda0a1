//! Links, scheduler and the per-node mesh engine.
//!
//! This crate runs one node of a self-organising tree mesh. A [`Mesh`] owns
//! its links, a cooperative [`Scheduler`] driving every periodic task, and
//! the package handlers that keep the topology, the shared clock and the
//! mesh id in agreement with the neighbours.
//!
//! ## Features
//!
//! - **Node sync**: per-link topology exchange with timeout and duplicate checks
//! - **Routing**: unicast forwarding along the tree, broadcast flooding
//! - **Time sync**: NTP-style offset correction towards the root
//! - **Mesh id**: weighted election of a cluster-wide id
//! - **Send queues**: bounded, priority aware, memory guarded
//! - **Hosts**: tokio TCP links and a deterministic in-memory [`sim::Cluster`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_session::{Mesh, MeshConfig};
//! use mesh_session::sim::MemoryTransport;
//!
//! let mut a = Mesh::new(1, MeshConfig::default());
//! let mut b = Mesh::new(2, MeshConfig::default());
//! let (ta, tb) = MemoryTransport::pair(4096);
//! a.add_link(Box::new(ta), true);
//! b.add_link(Box::new(tb), false);
//!
//! a.on_receive(|_, (from, msg)| println!("{} says {}", from, msg));
//! a.execute(0);
//! b.execute(0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod link;
pub mod mesh;
pub mod meshid;
pub mod ntp;
pub mod queue;
pub mod scheduler;
pub mod sim;
pub mod transport;

// Re-export main types
pub use config::MeshConfig;
pub use error::{LinkError, QueueError};
pub use link::{Link, LinkId, LinkState, LinkTasks};
pub use mesh::{Mesh, MeshEvent};
pub use meshid::{MeshIdState, MeshIdUpdate, MAX_ORIGINAL_ID, ROOT_MESH_ID};
pub use ntp::{time_offset, trip_delay};
pub use queue::{DrainReport, SendQueue};
pub use scheduler::{Iterations, Scheduler, TaskCallback, TaskId};
pub use transport::{
    connect_tcp, listen_tcp, spawn_tcp_link, ChannelTransport, MemoryMonitor, Transport,
    TransportEvent, UnboundedMemory,
};
