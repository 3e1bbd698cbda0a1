//! Event listeners and their deferred delivery.

use super::Mesh;
use crate::link::LinkId;
use mesh_routing::CallbackList;
use tracing::debug;

/// Something listeners may want to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A neighbour was identified
    NewConnection(u32),
    /// A link closed; `node_id` is 0 if the peer was never identified
    DroppedConnection {
        /// Last known peer id
        node_id: u32,
        /// Whether this node had opened the link
        station: bool,
    },
    /// The layout changed behind the link to this node
    ChangedConnections(u32),
    /// A link was opened, peer not known yet
    UnknownConnection(LinkId),
    /// Time sync shifted node time by this many ms
    TimeAdjusted(i32),
    /// A delay measurement finished
    NodeDelay {
        /// Measured node
        node_id: u32,
        /// One-way delay in ms
        delay: i32,
    },
    /// The mesh id changed
    MeshIdChanged(u16),
    /// Application message
    Received {
        /// Original sender
        from: u32,
        /// Text
        msg: String,
    },
}

#[derive(Default)]
pub(crate) struct MeshCallbacks {
    new_connection: CallbackList<Mesh, u32>,
    dropped_connection: CallbackList<Mesh, (u32, bool)>,
    changed_connections: CallbackList<Mesh, u32>,
    unknown_connection: CallbackList<Mesh, LinkId>,
    time_adjusted: CallbackList<Mesh, i32>,
    node_delay: CallbackList<Mesh, (u32, i32)>,
    mesh_id_changed: CallbackList<Mesh, u16>,
    receive: CallbackList<Mesh, (u32, String)>,
}

fn new_connection(mesh: &mut Mesh) -> &mut CallbackList<Mesh, u32> {
    &mut mesh.events.new_connection
}

fn dropped_connection(mesh: &mut Mesh) -> &mut CallbackList<Mesh, (u32, bool)> {
    &mut mesh.events.dropped_connection
}

fn changed_connections(mesh: &mut Mesh) -> &mut CallbackList<Mesh, u32> {
    &mut mesh.events.changed_connections
}

fn unknown_connection(mesh: &mut Mesh) -> &mut CallbackList<Mesh, LinkId> {
    &mut mesh.events.unknown_connection
}

fn time_adjusted(mesh: &mut Mesh) -> &mut CallbackList<Mesh, i32> {
    &mut mesh.events.time_adjusted
}

fn node_delay(mesh: &mut Mesh) -> &mut CallbackList<Mesh, (u32, i32)> {
    &mut mesh.events.node_delay
}

fn mesh_id_changed(mesh: &mut Mesh) -> &mut CallbackList<Mesh, u16> {
    &mut mesh.events.mesh_id_changed
}

fn receive(mesh: &mut Mesh) -> &mut CallbackList<Mesh, (u32, String)> {
    &mut mesh.events.receive
}

impl Mesh {
    /// Deliver `event` from a one-shot task on the next pass
    pub(crate) fn schedule_event(&mut self, event: MeshEvent) {
        self.scheduler.add_once(move |mesh: &mut Mesh| {
            mesh.fire(event.clone());
        });
    }

    /// Deliver `event` to its listeners now; returns how many ran
    pub(crate) fn fire(&mut self, event: MeshEvent) -> usize {
        debug!(?event, "mesh event");
        match event {
            MeshEvent::NewConnection(node_id) => {
                CallbackList::execute(self, new_connection, node_id)
            }
            MeshEvent::DroppedConnection { node_id, station } => {
                CallbackList::execute(self, dropped_connection, (node_id, station))
            }
            MeshEvent::ChangedConnections(node_id) => {
                CallbackList::execute(self, changed_connections, node_id)
            }
            MeshEvent::UnknownConnection(link) => {
                CallbackList::execute(self, unknown_connection, link)
            }
            MeshEvent::TimeAdjusted(offset) => CallbackList::execute(self, time_adjusted, offset),
            MeshEvent::NodeDelay { node_id, delay } => {
                CallbackList::execute(self, node_delay, (node_id, delay))
            }
            MeshEvent::MeshIdChanged(id) => CallbackList::execute(self, mesh_id_changed, id),
            MeshEvent::Received { from, msg } => CallbackList::execute(self, receive, (from, msg)),
        }
    }

    /// Called with the id of every newly identified neighbour
    pub fn on_new_connection<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, u32) + 'static,
    {
        self.events.new_connection.push(callback);
    }

    /// Called with `(node_id, station)` when a link closes
    pub fn on_dropped_connection<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, (u32, bool)) + 'static,
    {
        self.events.dropped_connection.push(callback);
    }

    /// Called when the layout behind a link changes
    pub fn on_changed_connections<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, u32) + 'static,
    {
        self.events.changed_connections.push(callback);
    }

    /// Called for every new link before its peer is known
    pub fn on_unknown_connection<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, LinkId) + 'static,
    {
        self.events.unknown_connection.push(callback);
    }

    /// Called with the applied offset after each time sync
    pub fn on_node_time_adjusted<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, i32) + 'static,
    {
        self.events.time_adjusted.push(callback);
    }

    /// Called with `(node_id, delay)` when a delay measurement completes
    pub fn on_node_delay_received<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, (u32, i32)) + 'static,
    {
        self.events.node_delay.push(callback);
    }

    /// Called with the new mesh id whenever it changes
    pub fn on_mesh_id_changed<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, u16) + 'static,
    {
        self.events.mesh_id_changed.push(callback);
    }

    /// Called with `(from, msg)` for every single or broadcast message
    pub fn on_receive<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Mesh, (u32, String)) + 'static,
    {
        self.events.receive.push(callback);
    }
}
