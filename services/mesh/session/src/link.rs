//! One point-to-point connection to a neighbour.

use crate::error::{LinkError, QueueError};
use crate::queue::{DrainReport, SendQueue};
use crate::scheduler::TaskId;
use crate::transport::Transport;
use bytes::Bytes;
use mesh_topology::{merge_subtree, MergeOutcome};
use mesh_wire::{FrameDecoder, NodeTree, WireError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Stable handle of a link inside one mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Node sync progress of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Nothing exchanged yet
    Unsynced,
    /// Our first node sync request is out
    AwaitingFirstSync,
    /// A valid subtree was accepted
    Synced,
    /// Being torn down
    Closing,
}

/// Scheduler tasks owned by a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTasks {
    /// Periodic node sync request
    pub node_sync: TaskId,
    /// Closes the link when a node sync reply is overdue
    pub timeout: TaskId,
    /// Dispatches reassembled frames
    pub read: TaskId,
    /// Drains the send queue
    pub send: TaskId,
    /// Periodic time sync, created on the first valid sync
    pub time_sync: Option<TaskId>,
}

impl LinkTasks {
    /// Every task id, for removal
    pub fn all(&self) -> Vec<TaskId> {
        let mut ids = vec![self.node_sync, self.timeout, self.read, self.send];
        ids.extend(self.time_sync);
        ids
    }
}

/// A connection, its queues and the subtree its peer last reported
pub struct Link {
    id: LinkId,
    remote_node_id: u32,
    station: bool,
    state: LinkState,
    subtree: NodeTree,
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    inbox: VecDeque<(Bytes, u32)>,
    queue: SendQueue,
    /// Scheduler tasks owned by this link
    pub tasks: LinkTasks,
}

impl Link {
    /// Wrap a fresh transport.
    ///
    /// `station` is true when this node opened the connection.
    pub fn new(
        id: LinkId,
        station: bool,
        transport: Box<dyn Transport>,
        queue: SendQueue,
        max_frame_size: usize,
        tasks: LinkTasks,
    ) -> Self {
        Self {
            id,
            remote_node_id: 0,
            station,
            state: LinkState::Unsynced,
            subtree: NodeTree::default(),
            transport,
            decoder: FrameDecoder::with_max_frame_size(max_frame_size),
            inbox: VecDeque::new(),
            queue,
            tasks,
        }
    }

    /// Handle
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Peer node id, 0 until learned
    pub fn remote_node_id(&self) -> u32 {
        self.remote_node_id
    }

    /// Whether this node opened the connection
    pub fn is_station(&self) -> bool {
        self.station
    }

    /// Node sync progress
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    /// Subtree last reported by the peer
    pub fn subtree(&self) -> &NodeTree {
        &self.subtree
    }

    /// Whether the link can still carry data
    pub fn is_connected(&self) -> bool {
        self.state != LinkState::Closing && self.transport.is_connected()
    }

    /// Record the peer id; true only when it was not known before
    pub fn identify(&mut self, node_id: u32) -> bool {
        if self.remote_node_id == 0 && node_id != 0 {
            self.remote_node_id = node_id;
            true
        } else {
            false
        }
    }

    /// Replace the stored subtree
    pub fn update_subtree(&mut self, tree: NodeTree) -> MergeOutcome {
        merge_subtree(&mut self.subtree, tree)
    }

    /// Feed received bytes; returns how many frames they completed
    pub fn receive(&mut self, chunk: &[u8], arrival: u32) -> Result<usize, WireError> {
        let frames = self.decoder.push(chunk)?;
        let count = frames.len();
        self.inbox.extend(frames.into_iter().map(|f| (f, arrival)));
        Ok(count)
    }

    /// Oldest reassembled frame body and its arrival time
    pub fn next_frame(&mut self) -> Option<(Bytes, u32)> {
        self.inbox.pop_front()
    }

    /// Queue a complete frame for sending
    pub fn add_message(
        &mut self,
        frame: Bytes,
        priority: bool,
        headroom: usize,
    ) -> Result<(), LinkError> {
        if self.state == LinkState::Closing {
            return Err(LinkError::Closed(self.id));
        }
        self.queue.enqueue(frame, priority, headroom)?;
        Ok(())
    }

    /// Push queued bytes into the transport
    pub fn write_next(&mut self) -> Result<DrainReport, QueueError> {
        self.queue.drain(self.transport.as_mut())
    }

    /// Frames waiting to be sent
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Close the transport and drop all buffered state
    pub fn shutdown(&mut self) {
        self.state = LinkState::Closing;
        self.transport.close();
        self.queue.clear();
        self.decoder.clear();
        self.inbox.clear();
        self.subtree.clear();
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("remote_node_id", &self.remote_node_id)
            .field("station", &self.station)
            .field("state", &self.state)
            .field("pending", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Iterations, Scheduler};
    use crate::sim::MemoryTransport;
    use mesh_wire::{encode_frame, Package};

    fn link(capacity: usize) -> (Link, MemoryTransport) {
        let mut scheduler: Scheduler<()> = Scheduler::new();
        let tasks = LinkTasks {
            node_sync: scheduler.create_persistent(0, Iterations::Forever, |_| {}),
            timeout: scheduler.create_persistent(0, Iterations::Forever, |_| {}),
            read: scheduler.create_persistent(0, Iterations::Forever, |_| {}),
            send: scheduler.create_persistent(0, Iterations::Forever, |_| {}),
            time_sync: None,
        };
        let (near, far) = MemoryTransport::pair(capacity);
        let link = Link::new(LinkId(1), true, Box::new(near), SendQueue::new(2, 0), 1024, tasks);
        (link, far)
    }

    #[test]
    fn test_identify_once() {
        let (mut link, _far) = link(64);
        assert!(!link.identify(0));
        assert!(link.identify(7));
        assert!(!link.identify(7));
        assert!(!link.identify(8));
        assert_eq!(link.remote_node_id(), 7);
    }

    #[test]
    fn test_receive_split_frames() {
        let (mut link, _far) = link(64);
        let body = Package::broadcast(3, "hi").encode().unwrap();
        let frame = encode_frame(&body).unwrap();

        let (head, tail) = frame.split_at(5);
        assert_eq!(link.receive(head, 10).unwrap(), 0);
        assert_eq!(link.receive(tail, 11).unwrap(), 1);
        assert_eq!(link.next_frame(), Some((body, 11)));
        assert_eq!(link.next_frame(), None);
    }

    #[test]
    fn test_send_through_transport() {
        let (mut link, far) = link(8);
        link.add_message(Bytes::from_static(b"0123456789"), false, usize::MAX)
            .unwrap();

        let report = link.write_next().unwrap();
        assert_eq!(report.written, 8);
        assert!(report.blocked);
        assert_eq!(far.read_all(), b"01234567");

        let report = link.write_next().unwrap();
        assert_eq!(report.frames, 1);
        assert_eq!(far.read_all(), b"89");
        assert_eq!(link.pending(), 0);
    }

    #[test]
    fn test_shutdown_refuses_messages() {
        let (mut link, far) = link(64);
        link.add_message(Bytes::from_static(b"x"), false, usize::MAX)
            .unwrap();
        link.shutdown();

        assert_eq!(link.state(), LinkState::Closing);
        assert!(!link.is_connected());
        assert!(!far.is_connected());
        assert_eq!(link.pending(), 0);
        assert!(matches!(
            link.add_message(Bytes::from_static(b"y"), true, usize::MAX),
            Err(LinkError::Closed(LinkId(1)))
        ));
    }

    #[test]
    fn test_tasks_all() {
        let (link, _far) = link(8);
        assert_eq!(link.tasks.all().len(), 4);
        assert_eq!(LinkId(4).to_string(), "link-4");
    }
}
