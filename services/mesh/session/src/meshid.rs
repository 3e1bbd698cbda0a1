//! Mesh id: a small cluster-wide id agreed on by weighted leader election.
//!
//! Every node starts as its own authority with a random id and its node id
//! as weight; the designated root uses id 255 and the largest weight. Nodes
//! announce `(id, weight)` to their neighbours and take over any heavier
//! announcement, remembering which neighbour it came from. When that
//! neighbour weakens or goes away the node falls back to its own id.
//!
//! A node that is the heaviest in its component and the only bridge between
//! two sub-meshes can keep flipping the id it passes on. That behaviour is
//! kept as is.

use crate::link::LinkId;
use crate::mesh::{Mesh, MeshEvent};
use crate::scheduler::{Iterations, TaskId};
use mesh_routing::{HandlerFlow, MessageId};
use mesh_wire::{MeshIdAnnounce, Package, Payload, TYPE_MESH_ID};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Id held by the designated root
pub const ROOT_MESH_ID: u16 = 255;

/// Largest randomly drawn id of a regular node
pub const MAX_ORIGINAL_ID: u16 = 240;

/// Election state of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshIdState {
    /// Id this node falls back to
    pub original_id: u16,
    /// Id currently held
    pub current_id: u16,
    /// Neighbour the current id came from, or this node
    pub source: u32,
    /// Weight backing the current id
    pub weight: u32,
    own_weight: u32,
}

/// Effect of one announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshIdUpdate {
    /// Same weight as ours
    Unchanged,
    /// Different but lighter weight from someone other than our source
    Ignored,
    /// Took over the announced id
    Adopted,
    /// Our source weakened; back to our own id
    Reverted,
}

impl MeshIdState {
    /// Initial state: own authority with `original_id`
    ///
    /// The root always holds [`ROOT_MESH_ID`] with the maximum weight.
    pub fn new(node_id: u32, root: bool, original_id: u16) -> Self {
        let (original_id, own_weight) = if root {
            (ROOT_MESH_ID, u32::MAX)
        } else {
            (original_id, node_id)
        };
        Self {
            original_id,
            current_id: original_id,
            source: node_id,
            weight: own_weight,
            own_weight,
        }
    }

    /// Initial state with a random id in `1..=240`
    pub fn random<R: Rng + ?Sized>(node_id: u32, root: bool, rng: &mut R) -> Self {
        Self::new(node_id, root, rng.gen_range(1..=MAX_ORIGINAL_ID))
    }

    /// Apply an announcement received by `node_id`
    pub fn apply(&mut self, node_id: u32, announce: &MeshIdAnnounce) -> MeshIdUpdate {
        if announce.weight == self.weight {
            return MeshIdUpdate::Unchanged;
        }

        if announce.from == self.source {
            if announce.weight > node_id {
                self.current_id = announce.id;
                self.weight = announce.weight;
                MeshIdUpdate::Adopted
            } else {
                self.revert(node_id);
                MeshIdUpdate::Reverted
            }
        } else if announce.weight > self.weight {
            self.current_id = announce.id;
            self.source = announce.from;
            self.weight = announce.weight;
            MeshIdUpdate::Adopted
        } else {
            MeshIdUpdate::Ignored
        }
    }

    /// Become our own authority again
    pub fn revert(&mut self, node_id: u32) {
        self.current_id = self.original_id;
        self.source = node_id;
        self.weight = self.own_weight;
    }

    /// What this node tells its neighbours
    pub fn announce(&self, node_id: u32) -> MeshIdAnnounce {
        MeshIdAnnounce {
            id: self.current_id,
            from: node_id,
            weight: self.weight,
        }
    }
}

pub(crate) struct MeshIdRuntime {
    pub(crate) state: MeshIdState,
    pub(crate) task: Option<TaskId>,
    pub(crate) generation: MessageId,
}

impl Mesh {
    /// Take part in mesh id election, drawing the fallback id from `rng`
    pub fn enable_mesh_id<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.mesh_id.is_some() {
            return;
        }
        let state = MeshIdState::random(self.node_id, self.root, rng);
        let task = self.scheduler.add_task(
            self.config.mesh_id_interval_ms,
            Iterations::Forever,
            |mesh: &mut Mesh| mesh.announce_mesh_id(),
        );
        self.registry
            .register(TYPE_MESH_ID, |mesh: &mut Mesh, package: &Package, link, _| {
                if let Payload::MeshId(announce) = &package.payload {
                    mesh.handle_mesh_id(link, announce);
                }
                HandlerFlow::Continue
            });
        info!("Mesh id {} (original) on node {}", state.original_id, self.node_id);
        self.mesh_id = Some(MeshIdRuntime {
            state,
            task: Some(task),
            generation: MessageId::default(),
        });
    }

    /// Current mesh id, if election is enabled
    pub fn mesh_id(&self) -> Option<u16> {
        self.mesh_id.as_ref().map(|r| r.state.current_id)
    }

    /// Full election state, if enabled
    pub fn mesh_id_state(&self) -> Option<&MeshIdState> {
        self.mesh_id.as_ref().map(|r| &r.state)
    }

    /// Counts mesh id changes; unset until the first change
    pub fn mesh_id_generation(&self) -> MessageId {
        self.mesh_id.as_ref().map(|r| r.generation).unwrap_or_default()
    }

    fn announce_mesh_id(&mut self) {
        let Some(runtime) = &self.mesh_id else {
            return;
        };
        let package = Package::mesh_id(runtime.state.announce(self.node_id));
        if let Err(e) = self.send_package(&package, false) {
            warn!("Could not announce mesh id: {}", e);
        }
    }

    fn handle_mesh_id(&mut self, link_id: LinkId, announce: &MeshIdAnnounce) {
        if let Some(link) = self.links.get_mut(&link_id) {
            if link.identify(announce.from) {
                self.schedule_event(MeshEvent::NewConnection(announce.from));
            }
        }

        let Some(runtime) = self.mesh_id.as_mut() else {
            return;
        };
        let before = runtime.state.current_id;
        let update = runtime.state.apply(self.node_id, announce);
        if update == MeshIdUpdate::Unchanged {
            return;
        }
        debug!(
            link = %link_id,
            from = announce.from,
            weight = announce.weight,
            ?update,
            "mesh id announcement"
        );
        self.mesh_id_updated(before);
    }

    /// Record a possible id change and announce without waiting
    fn mesh_id_updated(&mut self, before: u16) {
        let Some(runtime) = self.mesh_id.as_mut() else {
            return;
        };
        let current = runtime.state.current_id;
        let task = runtime.task;
        if current != before {
            let generation = runtime.generation.increment();
            info!("Mesh id {} -> {} (generation {})", before, current, generation);
            self.schedule_event(MeshEvent::MeshIdChanged(current));
        }
        if let Some(task) = task {
            self.scheduler.force_next_iteration(task);
        }
    }

    pub(crate) fn mesh_id_link_added(&mut self) {
        if let Some(task) = self.mesh_id.as_ref().and_then(|r| r.task) {
            self.scheduler.force_next_iteration(task);
        }
    }

    pub(crate) fn mesh_id_link_dropped(&mut self, node_id: u32) {
        let node = self.node_id;
        let Some(runtime) = self.mesh_id.as_mut() else {
            return;
        };
        if node_id == 0 || node_id != runtime.state.source {
            return;
        }
        let before = runtime.state.current_id;
        runtime.state.revert(node);
        info!("Mesh id source {} dropped, reverting", node_id);
        self.mesh_id_updated(before);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Cluster;
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    fn announce(id: u16, from: u32, weight: u32) -> MeshIdAnnounce {
        MeshIdAnnounce { id, from, weight }
    }

    #[test]
    fn test_initial_state() {
        let node = MeshIdState::new(42, false, 17);
        assert_eq!((node.current_id, node.source, node.weight), (17, 42, 42));

        let root = MeshIdState::new(7, true, 17);
        assert_eq!(root.current_id, ROOT_MESH_ID);
        assert_eq!(root.weight, u32::MAX);
    }

    #[test]
    fn test_random_id_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let state = MeshIdState::random(5, false, &mut rng);
            assert!((1..=MAX_ORIGINAL_ID).contains(&state.original_id));
        }
    }

    #[test]
    fn test_apply_rules() {
        let mut state = MeshIdState::new(50, false, 10);

        // Lighter, not from our source
        assert_eq!(state.apply(50, &announce(3, 20, 20)), MeshIdUpdate::Ignored);
        assert_eq!(state.current_id, 10);

        // Same weight
        assert_eq!(state.apply(50, &announce(3, 20, 50)), MeshIdUpdate::Unchanged);

        // Heavier from elsewhere
        assert_eq!(state.apply(50, &announce(99, 60, 60)), MeshIdUpdate::Adopted);
        assert_eq!((state.current_id, state.source, state.weight), (99, 60, 60));

        // Source moves to something still heavier than us
        assert_eq!(state.apply(50, &announce(120, 60, 900)), MeshIdUpdate::Adopted);
        assert_eq!((state.current_id, state.source, state.weight), (120, 60, 900));

        // Source drops below our own id
        assert_eq!(state.apply(50, &announce(5, 60, 40)), MeshIdUpdate::Reverted);
        assert_eq!((state.current_id, state.source, state.weight), (10, 50, 50));
    }

    #[test]
    fn test_root_never_yields() {
        let mut state = MeshIdState::new(1, true, 0);
        assert_eq!(state.apply(1, &announce(9, 2, 1_000_000)), MeshIdUpdate::Ignored);
        assert_eq!(state.current_id, ROOT_MESH_ID);
    }

    #[test]
    fn test_two_nodes_converge() {
        let mut cluster = Cluster::new(11);
        let root = cluster.add_root(10);
        let node = cluster.add_node(20);
        cluster.connect(node, root);
        cluster.run_for(1_000);
        assert_eq!(cluster.mesh_ids(), vec![Some(ROOT_MESH_ID), Some(ROOT_MESH_ID)]);
        assert_eq!(cluster.node(node).mesh_id_state().unwrap().source, 10);
    }

    #[test]
    fn test_chain_converges_on_root() {
        let mut cluster = Cluster::new(12);
        let mut prev = cluster.add_root(1);
        for id in 2..=9 {
            let next = cluster.add_node(id);
            cluster.connect(next, prev);
            prev = next;
        }
        cluster.run_for(3_000);
        assert!(cluster.mesh_ids().iter().all(|id| *id == Some(ROOT_MESH_ID)));
    }

    #[test]
    fn test_rootless_mesh_agrees_on_heaviest() {
        let mut cluster = Cluster::new(13);
        let a = cluster.add_node(300);
        let b = cluster.add_node(100);
        let c = cluster.add_node(200);
        cluster.connect(b, a);
        cluster.connect(c, b);
        cluster.run_for(3_000);

        let heaviest = cluster.node(a).mesh_id_state().unwrap().original_id;
        assert_eq!(cluster.mesh_ids(), vec![Some(heaviest); 3]);
        assert_eq!(cluster.node(c).mesh_id_state().unwrap().weight, 300);
    }

    #[test]
    fn test_change_event_and_generation() {
        let mut cluster = Cluster::new(14);
        let root = cluster.add_root(1);
        let node = cluster.add_node(2);

        let changes = Rc::new(RefCell::new(Vec::new()));
        let seen = changes.clone();
        cluster
            .node_mut(node)
            .on_mesh_id_changed(move |_, id| seen.borrow_mut().push(id));
        assert!(cluster.node(node).mesh_id_generation().is_unset());

        cluster.connect(node, root);
        cluster.run_for(1_000);

        assert_eq!(*changes.borrow(), vec![ROOT_MESH_ID]);
        assert_eq!(cluster.node(node).mesh_id_generation(), MessageId::new(1));
    }

    #[test]
    fn test_partition_and_heal() {
        // Binary tree of 12 nodes, index 0 is the root
        let mut cluster = Cluster::new(15);
        cluster.add_root(1000);
        for i in 1..12u32 {
            cluster.add_node(1000 + i);
        }
        let mut wires = Vec::new();
        for i in 1..12usize {
            wires.push(cluster.connect(i, (i - 1) / 2));
        }
        cluster.run_for(30_000);
        assert!(cluster.mesh_ids().iter().all(|id| *id == Some(ROOT_MESH_ID)));

        // Cut between announcement rounds
        cluster.run_for(5_000);
        cluster.disconnect(wires[0]);
        cluster.run_for(9_000);

        let ids = cluster.mesh_ids();
        let distinct: BTreeSet<_> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), 2, "{ids:?}");

        let cut_off = [1usize, 3, 4, 7, 8, 9, 10];
        let island = ids[1];
        assert_ne!(island, Some(ROOT_MESH_ID));
        for (index, id) in ids.iter().enumerate() {
            if cut_off.contains(&index) {
                assert_eq!(*id, island, "node {index}");
            } else {
                assert_eq!(*id, Some(ROOT_MESH_ID), "node {index}");
            }
        }

        cluster.connect(1, 0);
        cluster.run_for(30_000);
        assert!(cluster.mesh_ids().iter().all(|id| *id == Some(ROOT_MESH_ID)));
    }
}
