//! The mesh engine of one node.
//!
//! A [`Mesh`] owns every link, the scheduler driving their tasks, the package
//! handler registry and the event listeners. Hosts feed it transport events
//! ([`Mesh::on_data`], [`Mesh::on_disconnect`]) and call [`Mesh::execute`]
//! with a millisecond clock; all protocol work happens inside `execute`.

use crate::config::MeshConfig;
use crate::link::{Link, LinkId, LinkTasks};
use crate::meshid::MeshIdRuntime;
use crate::queue::SendQueue;
use crate::scheduler::{Iterations, Scheduler, TaskId};
use crate::transport::{MemoryMonitor, Transport, UnboundedMemory};
use mesh_routing::{CallbackRegistry, HandlerFlow, Router, RouterStats};
use mesh_topology::{Layout, Stability};
use mesh_wire::{NodeTree, Package};
use std::collections::BTreeMap;
use tracing::{debug, info};

mod events;
mod inbound;
mod node_sync;
mod outbound;

pub use events::MeshEvent;
pub(crate) use events::MeshCallbacks;

/// One node of the tree mesh
pub struct Mesh {
    pub(crate) node_id: u32,
    pub(crate) root: bool,
    pub(crate) config: MeshConfig,
    pub(crate) links: BTreeMap<LinkId, Link>,
    next_link: u32,
    pub(crate) scheduler: Scheduler<Mesh>,
    pub(crate) registry: CallbackRegistry<Mesh, LinkId>,
    pub(crate) router: Router,
    pub(crate) events: MeshCallbacks,
    memory: Box<dyn MemoryMonitor>,
    pub(crate) stability: Stability,
    now_ms: u64,
    pub(crate) time_offset: u32,
    pub(crate) mesh_id: Option<MeshIdRuntime>,
}

pub(crate) fn scheduler(mesh: &mut Mesh) -> &mut Scheduler<Mesh> {
    &mut mesh.scheduler
}

pub(crate) fn registry(mesh: &mut Mesh) -> &mut CallbackRegistry<Mesh, LinkId> {
    &mut mesh.registry
}

impl Mesh {
    /// Create a node with the built-in package handlers installed
    pub fn new(node_id: u32, config: MeshConfig) -> Self {
        let mut mesh = Self {
            node_id,
            root: false,
            config,
            links: BTreeMap::new(),
            next_link: 1,
            scheduler: Scheduler::new(),
            registry: CallbackRegistry::new(),
            router: Router::new(node_id),
            events: MeshCallbacks::default(),
            memory: Box::new(UnboundedMemory),
            stability: Stability::default(),
            now_ms: 0,
            time_offset: 0,
            mesh_id: None,
        };
        mesh.install_handlers();
        info!("Mesh node {} initialized", node_id);
        mesh
    }

    /// Use `memory` for send queue admission
    pub fn with_memory_monitor(mut self, memory: Box<dyn MemoryMonitor>) -> Self {
        self.memory = memory;
        self
    }

    fn install_handlers(&mut self) {
        self.install_node_sync_handlers();
        self.install_time_handlers();
        self.install_message_handlers();
    }

    /// Mark this node as the designated root.
    ///
    /// Call before [`Mesh::enable_mesh_id`]; the mesh id weight is fixed there.
    pub fn set_root(&mut self, root: bool) {
        self.root = root;
    }

    /// Local node id
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Whether this node is the designated root
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Engine tunables
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Adopt a connection. `station` is true when this node dialled out.
    pub fn add_link(&mut self, transport: Box<dyn Transport>, station: bool) -> LinkId {
        self.add_link_with(station, move |_| transport)
    }

    /// Adopt a connection whose transport needs to know its link id
    pub fn add_link_with<F>(&mut self, station: bool, make: F) -> LinkId
    where
        F: FnOnce(LinkId) -> Box<dyn Transport>,
    {
        let id = LinkId(self.next_link);
        self.next_link += 1;

        let node_sync = self.scheduler.create_persistent(
            self.config.node_sync_interval_ms,
            Iterations::Forever,
            move |mesh: &mut Mesh| mesh.node_sync_tick(id),
        );
        let timeout = self.scheduler.create_persistent(
            self.config.node_timeout_ms,
            Iterations::Times(1),
            move |mesh: &mut Mesh| mesh.node_sync_timeout(id),
        );
        let read = self
            .scheduler
            .create_persistent(0, Iterations::Forever, move |mesh: &mut Mesh| mesh.read_tick(id));
        let send = self.scheduler.create_persistent(
            self.config.buffer_task_interval_ms,
            Iterations::Forever,
            move |mesh: &mut Mesh| mesh.send_tick(id),
        );

        if station {
            self.scheduler.enable(node_sync);
        } else {
            self.scheduler
                .enable_delayed(node_sync, self.config.node_sync_initial_delay_ms);
        }

        let tasks = LinkTasks {
            node_sync,
            timeout,
            read,
            send,
            time_sync: None,
        };
        let queue = SendQueue::new(self.config.max_message_queue, self.config.min_free_memory);
        let link = Link::new(id, station, make(id), queue, self.config.max_frame_size, tasks);
        self.links.insert(id, link);

        info!("New {} connection {}", if station { "station" } else { "AP" }, id);
        self.schedule_event(MeshEvent::UnknownConnection(id));
        self.mesh_id_link_added();
        id
    }

    /// Transport reported that the connection went away
    pub fn on_disconnect(&mut self, link_id: LinkId) {
        self.close_link(link_id);
    }

    /// Close a link and drop everything it owned.
    ///
    /// Returns false when the link was already gone.
    pub fn close_link(&mut self, link_id: LinkId) -> bool {
        let Some(mut link) = self.links.remove(&link_id) else {
            return false;
        };
        let node_id = link.remote_node_id();
        let station = link.is_station();
        let had_subtree = !link.subtree().is_empty();

        link.shutdown();
        for task in link.tasks.all() {
            self.scheduler.remove(task);
        }
        self.stability.halve();
        info!("Closed connection {} to node {}", link_id, node_id);

        if had_subtree {
            self.sync_layout(None);
            self.schedule_event(MeshEvent::ChangedConnections(node_id));
        }
        self.schedule_event(MeshEvent::DroppedConnection { node_id, station });
        self.mesh_id_link_dropped(node_id);
        true
    }

    /// Run every task due at `now_ms`; returns how many ran
    pub fn execute(&mut self, now_ms: u64) -> usize {
        self.now_ms = now_ms;
        Scheduler::execute(self, scheduler, now_ms)
    }

    /// Close every link and forget all handlers and tasks
    pub fn stop(&mut self) {
        let ids: Vec<LinkId> = self.links.keys().copied().collect();
        for id in ids {
            self.close_link(id);
        }
        self.registry.clear();
        self.scheduler.clear();
        if let Some(runtime) = self.mesh_id.as_mut() {
            runtime.task = None;
        }
        info!("Mesh node {} stopped", self.node_id);
    }

    /// Register a handler for a package type
    pub fn on_package<F>(&mut self, package_type: u16, handler: F)
    where
        F: FnMut(&mut Mesh, &Package, LinkId, u32) -> HandlerFlow + 'static,
    {
        self.registry.register(package_type, handler);
    }

    /// Add a pooled task to the node's scheduler
    pub fn add_task<F>(&mut self, interval_ms: u64, iterations: Iterations, callback: F) -> TaskId
    where
        F: FnMut(&mut Mesh) + 'static,
    {
        self.scheduler.add_task(interval_ms, iterations, callback)
    }

    /// The node's scheduler
    pub fn scheduler_mut(&mut self) -> &mut Scheduler<Mesh> {
        &mut self.scheduler
    }

    pub(crate) fn headroom(&self) -> usize {
        self.memory.available_headroom()
    }

    pub(crate) fn layout(&self) -> Layout<'_, LinkId> {
        let mut layout = Layout::new(self.node_id, self.root);
        for (id, link) in &self.links {
            layout.push(*id, link.subtree());
        }
        layout
    }

    pub(crate) fn route_to(&self, dest: u32) -> Option<LinkId> {
        self.layout().route_to(dest)
    }

    /// Milliseconds of the last [`Mesh::execute`]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Local clock corrected by time sync
    pub fn node_time(&self) -> u32 {
        (self.now_ms as u32).wrapping_add(self.time_offset)
    }

    /// Shift node time by `offset` ms
    pub fn adjust_node_time(&mut self, offset: i32) {
        self.time_offset = self.time_offset.wrapping_add(offset as u32);
        debug!(offset, node_time = self.node_time(), "node time adjusted");
    }

    /// This node and everything reachable below it
    pub fn as_node_tree(&self) -> NodeTree {
        self.layout().as_node_tree()
    }

    /// Known node ids, optionally including this one
    pub fn node_list(&self, include_self: bool) -> Vec<u32> {
        self.layout().node_ids(include_self)
    }

    /// Whether `node_id` is reachable
    pub fn is_connected(&self, node_id: u32) -> bool {
        self.layout().contains(node_id)
    }

    /// The combined tree as JSON
    pub fn sub_connection_json(&self, pretty: bool) -> String {
        self.as_node_tree().to_json(pretty)
    }

    /// How settled the topology is, `0..=1000`
    pub fn stability(&self) -> u32 {
        self.stability.value()
    }

    /// Open links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Handles of the open links
    pub fn link_ids(&self) -> Vec<LinkId> {
        self.links.keys().copied().collect()
    }

    /// Look a link up
    pub fn link(&self, link_id: LinkId) -> Option<&Link> {
        self.links.get(&link_id)
    }

    /// Link whose peer is `node_id`
    pub fn link_to(&self, node_id: u32) -> Option<LinkId> {
        self.links
            .values()
            .find(|l| l.remote_node_id() == node_id)
            .map(Link::id)
    }

    /// Routing counters
    pub fn router_stats(&self) -> &RouterStats {
        self.router.stats()
    }
}
