//! Error types for links and send queues.

use crate::link::LinkId;
use mesh_topology::TopologyError;
use mesh_wire::WireError;
use thiserror::Error;

/// Send queue admission and drain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Non-priority queue is at capacity
    #[error("send queue full: {pending} frames pending")]
    QueueFull {
        /// Regular frames already waiting
        pending: usize,
    },

    /// Not enough free memory to hold the frame
    #[error("memory pressure: {headroom} bytes free, {needed} required")]
    MemoryPressure {
        /// Headroom reported by the memory monitor
        headroom: usize,
        /// Low-water mark plus frame size
        needed: usize,
    },

    /// Transport accepted part of a write it had room for
    #[error("transport accepted {written} of {requested} bytes")]
    PartialWriteBug {
        /// Bytes offered
        requested: usize,
        /// Bytes the transport reported as accepted
        written: usize,
    },
}

/// Errors at the link/router boundary
#[derive(Error, Debug)]
pub enum LinkError {
    /// Frame could not be encoded or decoded
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Reported subtree was refused
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Frame could not be queued or written
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Link is shutting down
    #[error("link {0} is closed")]
    Closed(LinkId),

    /// No link with this id
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
}
