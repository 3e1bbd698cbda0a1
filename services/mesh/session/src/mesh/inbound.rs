//! Receive path: reassembly, routing and local dispatch.

use super::{registry, Mesh, MeshEvent};
use crate::error::LinkError;
use crate::link::{Link, LinkId};
use bytes::Bytes;
use mesh_routing::{CallbackRegistry, HandlerFlow, RoutingDecision};
use mesh_wire::{encode_frame, Package, Payload, ProtocolHeader, TYPE_BROADCAST, TYPE_SINGLE};
use tracing::{debug, trace, warn};

impl Mesh {
    /// Transport delivered bytes on `link_id`
    ///
    /// Complete frames are dispatched by the link's read task on the next
    /// pass. A frame declaring more than the configured maximum closes the link.
    pub fn on_data(&mut self, link_id: LinkId, data: &[u8]) {
        let arrival = self.node_time();
        let Some(link) = self.links.get_mut(&link_id) else {
            debug!(link = %link_id, "data for unknown link");
            return;
        };
        match link.receive(data, arrival) {
            Ok(0) => {}
            Ok(frames) => {
                trace!(link = %link_id, frames, "frames reassembled");
                let read = link.tasks.read;
                self.scheduler.enable(read);
            }
            Err(e) => {
                warn!("Closing {}: {}", link_id, e);
                self.close_link(link_id);
            }
        }
    }

    pub(crate) fn read_tick(&mut self, link_id: LinkId) {
        while let Some((frame, arrival)) = self.links.get_mut(&link_id).and_then(Link::next_frame) {
            self.route_frame(link_id, frame, arrival);
        }
        if let Some(link) = self.links.get(&link_id) {
            let read = link.tasks.read;
            self.scheduler.disable(read);
        }
    }

    fn route_frame(&mut self, link_id: LinkId, frame: Bytes, arrival: u32) {
        let header = match ProtocolHeader::peek(&frame) {
            Ok(header) => header,
            Err(e) => {
                self.router.record_malformed();
                warn!("Dropping malformed frame from {}: {}", link_id, e);
                return;
            }
        };

        let decision = self.router.decide(&header, |dest| self.route_to(dest));
        self.router.record(&decision);
        match decision {
            RoutingDecision::Forward(next) => {
                trace!(from = %link_id, to = %next, dest = header.dest, "forwarding");
                self.forward_frame(next, &frame);
            }
            RoutingDecision::Flood => {
                for other in self.fan_out_links(header.routing, Some(link_id)) {
                    self.forward_frame(other, &frame);
                }
                self.dispatch_local(link_id, &frame, arrival);
            }
            RoutingDecision::Local => self.dispatch_local(link_id, &frame, arrival),
            RoutingDecision::Drop(reason) => {
                debug!(
                    link = %link_id,
                    dest = header.dest,
                    package_type = header.package_type,
                    "dropping frame: {}",
                    reason
                );
            }
        }
    }

    /// Queue an already encoded body unchanged
    fn forward_frame(&mut self, link_id: LinkId, body: &[u8]) {
        let result = encode_frame(body)
            .map_err(LinkError::from)
            .and_then(|frame| self.queue_frame(link_id, frame, false));
        if let Err(e) = result {
            debug!("Could not forward on {}: {}", link_id, e);
        }
    }

    fn dispatch_local(&mut self, link_id: LinkId, body: &[u8], arrival: u32) {
        let package = match Package::decode(body) {
            Ok(package) => package,
            Err(e) => {
                self.router.record_malformed();
                warn!("Dropping undecodable frame from {}: {}", link_id, e);
                return;
            }
        };
        let outcome = CallbackRegistry::dispatch(self, registry, &package, link_id, arrival);
        trace!(
            link = %link_id,
            package_type = package.package_type(),
            handlers = outcome.invoked,
            "dispatched"
        );
    }

    pub(super) fn install_message_handlers(&mut self) {
        self.registry
            .register(TYPE_SINGLE, |mesh: &mut Mesh, package: &Package, _, _| {
                if let Payload::Single(message) = &package.payload {
                    mesh.fire(MeshEvent::Received {
                        from: message.from,
                        msg: message.msg.clone(),
                    });
                }
                HandlerFlow::Continue
            });
        self.registry
            .register(TYPE_BROADCAST, |mesh: &mut Mesh, package: &Package, _, _| {
                if let Payload::Broadcast(message) = &package.payload {
                    mesh.fire(MeshEvent::Received {
                        from: message.from,
                        msg: message.msg.clone(),
                    });
                }
                HandlerFlow::Continue
            });
    }
}
