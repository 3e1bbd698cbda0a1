//! Node sync: subtree exchange, validation and change propagation.

use super::{Mesh, MeshEvent};
use crate::link::{LinkId, LinkState};
use mesh_routing::HandlerFlow;
use mesh_topology::MergeOutcome;
use mesh_wire::{NodeSync, Package, Payload, TYPE_NODE_SYNC_REPLY, TYPE_NODE_SYNC_REQUEST};
use tracing::{debug, info, warn};

impl Mesh {
    pub(super) fn install_node_sync_handlers(&mut self) {
        self.registry
            .register(TYPE_NODE_SYNC_REQUEST, |mesh: &mut Mesh, package: &Package, link, _| {
                if let Payload::NodeSyncRequest(sync) = &package.payload {
                    mesh.handle_node_sync(link, sync, true);
                }
                HandlerFlow::Continue
            });
        self.registry
            .register(TYPE_NODE_SYNC_REPLY, |mesh: &mut Mesh, package: &Package, link, _| {
                if let Payload::NodeSyncReply(sync) = &package.payload {
                    mesh.handle_node_sync(link, sync, false);
                }
                HandlerFlow::Continue
            });
    }

    /// Periodic request on one link; also arms the reply timeout
    pub(crate) fn node_sync_tick(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        if link.state() == LinkState::Unsynced {
            link.set_state(LinkState::AwaitingFirstSync);
        }
        let dest = link.remote_node_id();
        let timeout = link.tasks.timeout;

        let tree = self.layout().as_node_tree_excluding(link_id);
        let package = Package::node_sync_request(self.node_id, dest, tree);
        self.scheduler.restart_delayed(timeout, self.config.node_timeout_ms);
        if let Err(e) = self.send_to_link(link_id, &package, true) {
            warn!("Could not send node sync on {}: {}", link_id, e);
        }
    }

    pub(crate) fn node_sync_timeout(&mut self, link_id: LinkId) {
        warn!("Node sync on {} timed out", link_id);
        self.close_link(link_id);
    }

    fn handle_node_sync(&mut self, link_id: LinkId, sync: &NodeSync, request: bool) {
        let Some(link) = self.links.get(&link_id) else {
            return;
        };
        let first = link.state() != LinkState::Synced;
        let verdict = {
            let layout = self.layout();
            layout
                .valid_subs(link_id, link.remote_node_id(), &sync.tree)
                .and_then(|()| {
                    if first {
                        layout.check_duplicate(link_id, sync.from)
                    } else {
                        Ok(())
                    }
                })
        };
        if let Err(e) = verdict {
            warn!("Rejecting subtree from node {} on {}: {}", sync.from, link_id, e);
            self.close_link(link_id);
            return;
        }

        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        let tasks = link.tasks;
        if first {
            let identified = link.identify(sync.from);
            link.set_state(LinkState::Synced);
            info!("Node {} synced on {}", sync.from, link_id);
            if identified {
                self.schedule_event(MeshEvent::NewConnection(sync.from));
            }
            self.start_time_sync(link_id);
        }

        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        match link.update_subtree(sync.tree.clone()) {
            MergeOutcome::Changed => {
                debug!(link = %link_id, node_id = sync.from, "subtree changed");
                self.sync_layout(Some(link_id));
                self.schedule_event(MeshEvent::ChangedConnections(sync.from));
            }
            MergeOutcome::Unchanged => {
                self.scheduler.delay(tasks.node_sync, self.config.node_sync_interval_ms);
                self.stability.bump();
            }
        }

        if request {
            let tree = self.layout().as_node_tree_excluding(link_id);
            let reply = Package::node_sync_reply(self.node_id, sync.from, tree);
            if let Err(e) = self.send_to_link(link_id, &reply, true) {
                warn!("Could not answer node sync on {}: {}", link_id, e);
            }
        } else {
            self.scheduler.disable(tasks.timeout);
        }
    }

    /// Make every link except `except` resend its subtree on the next pass
    pub(crate) fn sync_layout(&mut self, except: Option<LinkId>) {
        for (id, link) in &self.links {
            if Some(*id) != except {
                self.scheduler.force_next_iteration(link.tasks.node_sync);
            }
        }
    }
}
