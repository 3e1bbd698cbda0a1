//! Deterministic in-memory hosts.
//!
//! [`Cluster`] runs several [`Mesh`] nodes against one manual clock and moves
//! bytes between them through bounded in-memory pipes. Each step executes
//! every node and then delivers whatever the pipes hold, cut into chunks of
//! random size from a seeded generator.

use crate::config::MeshConfig;
use crate::link::LinkId;
use crate::mesh::Mesh;
use crate::transport::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug)]
struct Pipe {
    data: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

type SharedPipe = Rc<RefCell<Pipe>>;

fn pipe(capacity: usize) -> SharedPipe {
    Rc::new(RefCell::new(Pipe {
        data: VecDeque::new(),
        capacity,
        closed: false,
    }))
}

/// One end of a bounded in-memory byte pipe pair
#[derive(Debug)]
pub struct MemoryTransport {
    outgoing: SharedPipe,
    incoming: SharedPipe,
}

impl MemoryTransport {
    /// Two connected ends, each direction holding at most `capacity` bytes
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
        let ab = pipe(capacity);
        let ba = pipe(capacity);
        (
            MemoryTransport {
                outgoing: ab.clone(),
                incoming: ba.clone(),
            },
            MemoryTransport {
                outgoing: ba,
                incoming: ab,
            },
        )
    }

    /// Take everything the other end has written so far
    pub fn read_all(&self) -> Vec<u8> {
        self.incoming.borrow_mut().data.drain(..).collect()
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, data: &[u8]) -> usize {
        let mut pipe = self.outgoing.borrow_mut();
        if pipe.closed {
            return 0;
        }
        let n = data.len().min(pipe.capacity.saturating_sub(pipe.data.len()));
        pipe.data.extend(&data[..n]);
        n
    }

    fn space(&self) -> usize {
        let pipe = self.outgoing.borrow();
        if pipe.closed {
            0
        } else {
            pipe.capacity.saturating_sub(pipe.data.len())
        }
    }

    fn close(&mut self) {
        self.outgoing.borrow_mut().closed = true;
        self.incoming.borrow_mut().closed = true;
    }

    fn is_connected(&self) -> bool {
        !self.outgoing.borrow().closed
    }
}

/// Position of a node in a [`Cluster`]
pub type NodeIndex = usize;

/// Handle of a connection in a [`Cluster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireId(usize);

struct Wire {
    station: NodeIndex,
    ap: NodeIndex,
    station_link: LinkId,
    ap_link: LinkId,
    to_ap: SharedPipe,
    to_station: SharedPipe,
    up: bool,
}

/// A set of nodes sharing one simulated clock
pub struct Cluster {
    nodes: Vec<Mesh>,
    wires: Vec<Wire>,
    config: MeshConfig,
    now_ms: u64,
    tick_ms: u64,
    max_chunk: usize,
    pipe_capacity: usize,
    rng: StdRng,
}

impl Cluster {
    /// Empty cluster with 10 ms ticks
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            wires: Vec::new(),
            config: MeshConfig::default(),
            now_ms: 0,
            tick_ms: 10,
            max_chunk: 64,
            pipe_capacity: 4096,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Configuration for nodes added from now on
    pub fn with_config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    /// Step length
    pub fn with_tick(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    /// Largest chunk handed to `on_data` at once
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Bytes a pipe direction holds before writers see backpressure
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Add a regular node
    pub fn add_node(&mut self, node_id: u32) -> NodeIndex {
        self.spawn(node_id, false)
    }

    /// Add the designated root
    pub fn add_root(&mut self, node_id: u32) -> NodeIndex {
        self.spawn(node_id, true)
    }

    fn spawn(&mut self, node_id: u32, root: bool) -> NodeIndex {
        let mut mesh = Mesh::new(node_id, self.config.clone());
        mesh.set_root(root);
        mesh.execute(self.now_ms);
        mesh.enable_mesh_id(&mut self.rng);
        self.nodes.push(mesh);
        self.nodes.len() - 1
    }

    /// Open a connection dialled by `station` and accepted by `ap`
    pub fn connect(&mut self, station: NodeIndex, ap: NodeIndex) -> WireId {
        let to_ap = pipe(self.pipe_capacity);
        let to_station = pipe(self.pipe_capacity);

        let station_link = self.nodes[station].add_link(
            Box::new(MemoryTransport {
                outgoing: to_ap.clone(),
                incoming: to_station.clone(),
            }),
            true,
        );
        let ap_link = self.nodes[ap].add_link(
            Box::new(MemoryTransport {
                outgoing: to_station.clone(),
                incoming: to_ap.clone(),
            }),
            false,
        );

        self.wires.push(Wire {
            station,
            ap,
            station_link,
            ap_link,
            to_ap,
            to_station,
            up: true,
        });
        WireId(self.wires.len() - 1)
    }

    /// Cut a connection; both ends see a disconnect immediately
    pub fn disconnect(&mut self, wire: WireId) {
        let Some(w) = self.wires.get_mut(wire.0) else {
            return;
        };
        if !w.up {
            return;
        }
        w.up = false;
        w.to_ap.borrow_mut().closed = true;
        w.to_station.borrow_mut().closed = true;
        let (station, station_link, ap, ap_link) = (w.station, w.station_link, w.ap, w.ap_link);
        self.nodes[station].on_disconnect(station_link);
        self.nodes[ap].on_disconnect(ap_link);
    }

    /// Whether the connection is still up
    pub fn is_up(&self, wire: WireId) -> bool {
        self.wires.get(wire.0).is_some_and(|w| w.up)
    }

    /// Link ids of a connection, station side first
    pub fn links(&self, wire: WireId) -> Option<(LinkId, LinkId)> {
        self.wires.get(wire.0).map(|w| (w.station_link, w.ap_link))
    }

    /// Advance the clock one tick, run every node, then deliver bytes
    pub fn step(&mut self) {
        self.now_ms += self.tick_ms;
        for node in &mut self.nodes {
            node.execute(self.now_ms);
        }
        self.pump();
    }

    /// Step until `ms` simulated milliseconds have passed
    pub fn run_for(&mut self, ms: u64) {
        let until = self.now_ms + ms;
        while self.now_ms < until {
            self.step();
        }
    }

    fn pump(&mut self) {
        for index in 0..self.wires.len() {
            if !self.wires[index].up {
                continue;
            }
            let (station, station_link, ap, ap_link) = {
                let w = &self.wires[index];
                (w.station, w.station_link, w.ap, w.ap_link)
            };

            let pipe = self.wires[index].to_ap.clone();
            for chunk in self.take_chunks(&pipe) {
                self.nodes[ap].on_data(ap_link, &chunk);
            }
            let pipe = self.wires[index].to_station.clone();
            for chunk in self.take_chunks(&pipe) {
                self.nodes[station].on_data(station_link, &chunk);
            }

            let w = &mut self.wires[index];
            let closed = w.to_ap.borrow().closed || w.to_station.borrow().closed;
            if closed {
                debug!(station, ap, "simulated connection closed by an end");
                w.up = false;
                self.nodes[station].on_disconnect(station_link);
                self.nodes[ap].on_disconnect(ap_link);
            }
        }
    }

    fn take_chunks(&mut self, pipe: &SharedPipe) -> Vec<Vec<u8>> {
        let bytes: Vec<u8> = pipe.borrow_mut().data.drain(..).collect();
        let mut chunks = Vec::new();
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let take = self.rng.gen_range(1..=self.max_chunk).min(rest.len());
            chunks.push(rest[..take].to_vec());
            rest = &rest[take..];
        }
        chunks
    }

    /// Node at `index`
    pub fn node(&self, index: NodeIndex) -> &Mesh {
        &self.nodes[index]
    }

    /// Node at `index`, mutably
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Mesh {
        &mut self.nodes[index]
    }

    /// Every node
    pub fn nodes(&self) -> &[Mesh] {
        &self.nodes
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Simulated time
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Mesh id of every node, in index order
    pub fn mesh_ids(&self) -> Vec<Option<u16>> {
        self.nodes.iter().map(Mesh::mesh_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_capacity() {
        let (mut a, b) = MemoryTransport::pair(4);
        assert_eq!(a.space(), 4);
        assert_eq!(a.write(b"abcdef"), 4);
        assert_eq!(a.space(), 0);
        assert_eq!(b.read_all(), b"abcd");
        assert_eq!(a.space(), 4);
    }

    #[test]
    fn test_memory_pair_close() {
        let (mut a, b) = MemoryTransport::pair(4);
        a.close();
        assert!(!a.is_connected());
        assert!(!b.is_connected());
        assert_eq!(a.write(b"x"), 0);
    }

    #[test]
    fn test_cluster_clock() {
        let mut cluster = Cluster::new(1).with_tick(5);
        cluster.add_node(1);
        cluster.run_for(100);
        assert_eq!(cluster.now_ms(), 100);
        assert_eq!(cluster.node(0).now_ms(), 100);
    }
}
