//! Send path: package routing, queueing and the send task.

use super::{Mesh, MeshEvent};
use crate::error::LinkError;
use crate::link::{LinkId, LinkState};
use bytes::Bytes;
use mesh_routing::Outbound;
use mesh_wire::{encode_package, Package, RoutingMode, UserPackage};
use tracing::{debug, error, trace, warn};

impl Mesh {
    /// Queue a package on the link(s) its routing mode selects.
    ///
    /// Returns how many links it was queued on; 0 when nothing reaches the
    /// destination.
    pub fn send_package(&mut self, package: &Package, priority: bool) -> Result<usize, LinkError> {
        let header = package.header;
        match self.router.outbound(&header, |dest| self.route_to(dest)) {
            Outbound::Link(link_id) => {
                self.send_to_link(link_id, package, priority)?;
                Ok(1)
            }
            Outbound::AllLinks => self.broadcast_package(package, None, priority),
            Outbound::Unreachable => {
                debug!(
                    dest = header.dest,
                    package_type = header.package_type,
                    "no route for package"
                );
                Ok(0)
            }
        }
    }

    /// Queue a package on one link, whether or not its peer is known yet
    pub fn send_to_link(
        &mut self,
        link_id: LinkId,
        package: &Package,
        priority: bool,
    ) -> Result<(), LinkError> {
        let frame = encode_package(package)?;
        self.queue_frame(link_id, frame, priority)
    }

    /// Queue a package on every link except `exclude`; returns how many took it.
    ///
    /// Broadcast packages only travel links that passed node sync. Neighbour
    /// packages go to every link, synced or not.
    pub fn broadcast_package(
        &mut self,
        package: &Package,
        exclude: Option<LinkId>,
        priority: bool,
    ) -> Result<usize, LinkError> {
        let frame = encode_package(package)?;
        let targets = self.fan_out_links(package.header.routing, exclude);

        let mut queued = 0;
        for link_id in targets {
            match self.queue_frame(link_id, frame.clone(), priority) {
                Ok(()) => queued += 1,
                Err(e) => warn!("Could not queue broadcast on {}: {}", link_id, e),
            }
        }
        Ok(queued)
    }

    /// Links a package with `routing` fans out to, leaving out `exclude`
    pub(super) fn fan_out_links(
        &self,
        routing: RoutingMode,
        exclude: Option<LinkId>,
    ) -> Vec<LinkId> {
        self.links
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter(|(_, link)| {
                routing != RoutingMode::Broadcast || link.state() == LinkState::Synced
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Send `msg` to `dest`; false when it could not be queued
    pub fn send_single(&mut self, dest: u32, msg: impl Into<String>) -> bool {
        let package = Package::single(self.node_id, dest, msg);
        match self.send_package(&package, false) {
            Ok(queued) => queued > 0,
            Err(e) => {
                warn!("Could not send to {}: {}", dest, e);
                false
            }
        }
    }

    /// Flood `msg` through the mesh; returns how many links took it.
    ///
    /// With `include_self` this node's receive listeners get it too, on the
    /// next pass.
    pub fn send_broadcast(&mut self, msg: impl Into<String>, include_self: bool) -> usize {
        let msg = msg.into();
        let package = Package::broadcast(self.node_id, msg.clone());
        let queued = match self.broadcast_package(&package, None, false) {
            Ok(queued) => queued,
            Err(e) => {
                warn!("Could not broadcast: {}", e);
                0
            }
        };
        if include_self {
            self.schedule_event(MeshEvent::Received {
                from: self.node_id,
                msg,
            });
        }
        queued
    }

    /// Send an application-defined package
    pub fn send_user<T: UserPackage>(&mut self, value: &T, dest: u32) -> Result<usize, LinkError> {
        let package = Package::user(value, dest)?;
        self.send_package(&package, false)
    }

    pub(crate) fn queue_frame(
        &mut self,
        link_id: LinkId,
        frame: Bytes,
        priority: bool,
    ) -> Result<(), LinkError> {
        let headroom = self.headroom();
        let link = self
            .links
            .get_mut(&link_id)
            .ok_or(LinkError::UnknownLink(link_id))?;
        link.add_message(frame, priority, headroom)?;
        let send = link.tasks.send;
        self.scheduler.enable(send);
        Ok(())
    }

    pub(crate) fn send_tick(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        let send = link.tasks.send;
        match link.write_next() {
            Ok(report) if report.blocked => {
                trace!(link = %link_id, written = report.written, "transport full, retrying");
                self.scheduler.delay(send, self.config.send_retry_delay_ms);
            }
            Ok(_) => {
                self.scheduler.disable(send);
            }
            Err(e) => {
                error!("Fatal write error on {}: {}", link_id, e);
                self.close_link(link_id);
            }
        }
    }
}
