//! Node time synchronisation and delay measurement.
//!
//! Neighbours exchange four timestamps: `t0` request sent, `t1` request
//! received, `t2` reply sent, `t3` reply received. Node times are `u32`
//! milliseconds and all arithmetic wraps.

use crate::link::LinkId;
use crate::mesh::{Mesh, MeshEvent};
use crate::scheduler::Iterations;
use mesh_routing::HandlerFlow;
use mesh_wire::{
    Package, Payload, TimeSync, TimeSyncKind, TimeSyncMessage, TYPE_TIME_DELAY, TYPE_TIME_SYNC,
};
use tracing::{debug, info, warn};

/// Offset that brings the requester's clock onto the responder's
pub fn time_offset(msg: &TimeSyncMessage, t3: u32) -> i32 {
    let there = msg.t1.wrapping_sub(msg.t0) as i32;
    let back = msg.t2.wrapping_sub(t3) as i32;
    ((there as i64 + back as i64) / 2) as i32
}

/// One-way delay of an exchange
pub fn trip_delay(msg: &TimeSyncMessage, t3: u32) -> i32 {
    let round_trip = t3.wrapping_sub(msg.t0) as i32;
    let processing = msg.t2.wrapping_sub(msg.t1) as i32;
    ((round_trip as i64 - processing as i64) / 2) as i32
}

impl Mesh {
    pub(crate) fn install_time_handlers(&mut self) {
        self.registry
            .register(TYPE_TIME_SYNC, |mesh: &mut Mesh, package: &Package, link, arrival| {
                if let Payload::TimeSync(sync) = &package.payload {
                    mesh.handle_time_sync(link, sync, arrival);
                }
                HandlerFlow::Continue
            });
        self.registry
            .register(TYPE_TIME_DELAY, |mesh: &mut Mesh, package: &Package, _, arrival| {
                if let Payload::TimeDelay(sync) = &package.payload {
                    mesh.handle_time_delay(sync, arrival);
                }
                HandlerFlow::Continue
            });
    }

    /// Create the time sync task of a freshly synced link
    pub(crate) fn start_time_sync(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get(&link_id) else {
            return;
        };
        if link.tasks.time_sync.is_some() {
            return;
        }
        let station = link.is_station();
        let task = self.scheduler.create_persistent(
            self.config.time_sync_interval_ms,
            Iterations::Forever,
            move |mesh: &mut Mesh| mesh.time_sync_tick(link_id),
        );
        if station {
            self.scheduler.enable(task);
        } else {
            self.scheduler
                .enable_delayed(task, self.config.time_sync_initial_delay_ms);
        }
        if let Some(link) = self.links.get_mut(&link_id) {
            link.tasks.time_sync = Some(task);
        }
    }

    fn time_sync_tick(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get(&link_id) else {
            return;
        };
        let dest = link.remote_node_id();
        let msg = if self.layout().adopts_time_from(link_id) {
            TimeSyncMessage::request(self.node_time())
        } else {
            TimeSyncMessage::sync_request()
        };
        debug!(link = %link_id, kind = ?msg.kind, "time sync");
        let package = Package::time_sync(self.node_id, dest, msg);
        if let Err(e) = self.send_to_link(link_id, &package, true) {
            warn!("Could not send time sync on {}: {}", link_id, e);
        }
    }

    fn handle_time_sync(&mut self, link_id: LinkId, sync: &TimeSync, arrival: u32) {
        let answer = match sync.msg.kind {
            TimeSyncKind::SyncRequest => Some(TimeSyncMessage::request(self.node_time())),
            TimeSyncKind::Request => Some(sync.msg.reply(arrival, self.node_time())),
            TimeSyncKind::Reply => {
                let offset = time_offset(&sync.msg, arrival);
                self.adjust_node_time(offset);
                let within = offset.unsigned_abs() < self.config.time_sync_accuracy_ms;
                if let Some(task) = self.links.get(&link_id).and_then(|l| l.tasks.time_sync) {
                    if within {
                        self.scheduler.delay(task, self.config.time_sync_interval_ms);
                    } else {
                        self.scheduler.force_next_iteration(task);
                    }
                }
                info!("Node time adjusted by {} ms via node {}", offset, sync.from);
                self.schedule_event(MeshEvent::TimeAdjusted(offset));
                None
            }
            TimeSyncKind::Error => {
                warn!("Time sync error reported by node {}", sync.from);
                None
            }
        };

        if let Some(msg) = answer {
            let package = Package::time_sync(self.node_id, sync.from, msg);
            if let Err(e) = self.send_to_link(link_id, &package, true) {
                warn!("Could not answer time sync on {}: {}", link_id, e);
            }
        }
    }

    /// Measure the one-way delay to `node_id`; false when it is unreachable
    pub fn start_delay_meas(&mut self, node_id: u32) -> bool {
        let package =
            Package::time_delay(self.node_id, node_id, TimeSyncMessage::request(self.node_time()));
        match self.send_package(&package, false) {
            Ok(queued) => queued > 0,
            Err(e) => {
                warn!("Could not start delay measurement to {}: {}", node_id, e);
                false
            }
        }
    }

    fn handle_time_delay(&mut self, sync: &TimeSync, arrival: u32) {
        match sync.msg.kind {
            TimeSyncKind::Request => {
                let reply = sync.msg.reply(arrival, self.node_time());
                let package = Package::time_delay(self.node_id, sync.from, reply);
                if let Err(e) = self.send_package(&package, false) {
                    warn!("Could not answer delay measurement from {}: {}", sync.from, e);
                }
            }
            TimeSyncKind::Reply => {
                let delay = trip_delay(&sync.msg, arrival);
                debug!(node_id = sync.from, delay, "delay measured");
                self.schedule_event(MeshEvent::NodeDelay {
                    node_id: sync.from,
                    delay,
                });
            }
            kind => debug!(?kind, node_id = sync.from, "ignoring time delay package"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::sim::Cluster;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn exchange(t0: u32, t1: u32, t2: u32) -> TimeSyncMessage {
        TimeSyncMessage::request(t0).reply(t1, t2)
    }

    #[test]
    fn test_offset_symmetric_path() {
        // Responder is 1000 ms ahead, 10 ms each way
        let msg = exchange(0, 1010, 1015);
        assert_eq!(time_offset(&msg, 25), 1000);
        assert_eq!(trip_delay(&msg, 25), 10);
    }

    #[test]
    fn test_offset_wraps() {
        let msg = exchange(u32::MAX - 5, 4, 6);
        assert_eq!(time_offset(&msg, 14), 1);
        assert_eq!(trip_delay(&msg, 14), 9);
    }

    #[test]
    fn test_offset_behind() {
        let msg = exchange(5000, 10, 12);
        assert_eq!(time_offset(&msg, 5022), -5000);
    }

    #[test]
    fn test_time_sync_converges_on_root() {
        let mut cluster = Cluster::new(3);
        let root = cluster.add_root(1000);
        let node = cluster.add_node(2000);
        cluster.node_mut(node).adjust_node_time(7_500);

        let adjusted = Rc::new(RefCell::new(Vec::new()));
        let seen = adjusted.clone();
        cluster
            .node_mut(node)
            .on_node_time_adjusted(move |_, offset| seen.borrow_mut().push(offset));

        cluster.connect(node, root);
        cluster.run_for(2_000);

        let drift = cluster
            .node(node)
            .node_time()
            .wrapping_sub(cluster.node(root).node_time()) as i32;
        assert!(drift.abs() <= 20, "drift {drift}");
        assert!(!adjusted.borrow().is_empty());
        // The root never moves
        assert_eq!(cluster.node(root).node_time() as u64, cluster.now_ms());
    }

    #[test]
    fn test_delay_measurement_over_two_hops() {
        let mut cluster = Cluster::new(5);
        let a = cluster.add_root(1);
        let b = cluster.add_node(2);
        let c = cluster.add_node(3);
        cluster.connect(b, a);
        cluster.connect(c, b);
        cluster.run_for(1_000);

        let delays = Rc::new(RefCell::new(Vec::new()));
        let seen = delays.clone();
        cluster
            .node_mut(a)
            .on_node_delay_received(move |_, (node_id, delay)| {
                seen.borrow_mut().push((node_id, delay))
            });

        assert!(cluster.node_mut(a).start_delay_meas(3));
        cluster.run_for(500);

        let delays = delays.borrow();
        assert_eq!(delays.len(), 1);
        assert_eq!(delays[0].0, 3);
        assert!(delays[0].1 >= 0);
    }

    #[test]
    fn test_delay_measurement_unreachable() {
        let mut mesh = Mesh::new(1, MeshConfig::default());
        assert!(!mesh.start_delay_meas(99));
    }
}
