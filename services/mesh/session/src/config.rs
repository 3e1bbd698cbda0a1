//! Engine tunables.

use serde::{Deserialize, Serialize};

/// Timing, queue and memory limits of one mesh node
///
/// All intervals are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Regular frames a link may hold before refusing more
    pub max_message_queue: usize,
    /// Free memory that must remain after queueing a frame
    pub min_free_memory: usize,
    /// Largest frame body accepted from a peer
    pub max_frame_size: usize,
    /// Period of the per-link node sync
    pub node_sync_interval_ms: u64,
    /// First node sync delay on accepted links
    pub node_sync_initial_delay_ms: u64,
    /// Time allowed for a node sync reply
    pub node_timeout_ms: u64,
    /// Retry delay when the transport has no room
    pub send_retry_delay_ms: u64,
    /// Fallback period of the send task
    pub buffer_task_interval_ms: u64,
    /// Period of the per-link time sync
    pub time_sync_interval_ms: u64,
    /// First time sync delay on accepted links
    pub time_sync_initial_delay_ms: u64,
    /// Offsets below this are considered in sync
    pub time_sync_accuracy_ms: u32,
    /// Period of the mesh id announcement
    pub mesh_id_interval_ms: u64,
    /// Links a host should keep open at most
    pub max_connections: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_message_queue: 50,
            min_free_memory: 4000,
            max_frame_size: mesh_wire::DEFAULT_MAX_FRAME_SIZE,
            node_sync_interval_ms: 60_000,
            node_sync_initial_delay_ms: 10_000,
            node_timeout_ms: 5_000,
            send_retry_delay_ms: 100,
            buffer_task_interval_ms: 1_000,
            time_sync_interval_ms: 60_000,
            time_sync_initial_delay_ms: 10_000,
            time_sync_accuracy_ms: 5,
            mesh_id_interval_ms: 10_000,
            max_connections: 4,
        }
    }
}
