//! Routing decisions for inbound and outbound packages

use mesh_wire::{ProtocolHeader, RoutingMode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do with a frame that arrived on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision<K> {
    /// Pass the original bytes on to this link, no local dispatch
    Forward(K),
    /// Pass the original bytes to every other link, then dispatch locally
    Flood,
    /// Dispatch locally
    Local,
    /// Discard
    Drop(DropReason),
}

/// Where an outbound package goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound<K> {
    /// The one link towards the destination
    Link(K),
    /// Every link
    AllLinks,
    /// Nothing reaches the destination
    Unreachable,
}

/// Reason for dropping a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// No link reaches the destination
    NoRoute,
    /// Header or payload could not be decoded
    Malformed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute => write!(f, "no route to destination"),
            DropReason::Malformed => write!(f, "malformed frame"),
        }
    }
}

/// Router statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Frames passed on towards a single destination
    pub packets_forwarded: u64,
    /// Broadcast frames re-flooded
    pub packets_flooded: u64,
    /// Frames dispatched locally
    pub packets_local: u64,
    /// Frames discarded
    pub packets_dropped: u64,
}

/// Classifies frames by routing mode
#[derive(Debug, Clone)]
pub struct Router {
    local_node_id: u32,
    stats: RouterStats,
}

impl Router {
    /// Create a router for `local_node_id`
    pub fn new(local_node_id: u32) -> Self {
        Self {
            local_node_id,
            stats: RouterStats::default(),
        }
    }

    /// Local node id
    pub fn local_node_id(&self) -> u32 {
        self.local_node_id
    }

    /// Decide what happens to an inbound frame.
    ///
    /// `route` maps a destination to the link whose subtree contains it and is
    /// only consulted for unicast frames addressed to someone else.
    pub fn decide<K>(
        &self,
        header: &ProtocolHeader,
        route: impl FnOnce(u32) -> Option<K>,
    ) -> RoutingDecision<K> {
        match header.routing {
            RoutingMode::Single if header.dest != self.local_node_id => match route(header.dest) {
                Some(link) => RoutingDecision::Forward(link),
                None => RoutingDecision::Drop(DropReason::NoRoute),
            },
            RoutingMode::Broadcast => RoutingDecision::Flood,
            _ => RoutingDecision::Local,
        }
    }

    /// Pick the links an outbound package is queued on.
    ///
    /// Unicast packages, and neighbour packages naming a destination, go to
    /// the link towards that destination. Broadcasts and neighbour packages
    /// without a destination go to every link.
    pub fn outbound<K>(
        &self,
        header: &ProtocolHeader,
        route: impl FnOnce(u32) -> Option<K>,
    ) -> Outbound<K> {
        match header.routing {
            RoutingMode::Broadcast => Outbound::AllLinks,
            RoutingMode::Neighbour if header.dest == 0 => Outbound::AllLinks,
            _ => match route(header.dest) {
                Some(link) => Outbound::Link(link),
                None => Outbound::Unreachable,
            },
        }
    }

    /// Count a decision
    pub fn record<K>(&mut self, decision: &RoutingDecision<K>) {
        match decision {
            RoutingDecision::Forward(_) => self.stats.packets_forwarded += 1,
            RoutingDecision::Flood => {
                self.stats.packets_flooded += 1;
                self.stats.packets_local += 1;
            }
            RoutingDecision::Local => self.stats.packets_local += 1,
            RoutingDecision::Drop(_) => self.stats.packets_dropped += 1,
        }
    }

    /// Count a frame that could not be decoded
    pub fn record_malformed(&mut self) {
        self.record::<()>(&RoutingDecision::Drop(DropReason::Malformed));
    }

    /// Statistics so far
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(dest: u32) -> Option<&'static str> {
        match dest {
            5 => Some("east"),
            6 => Some("west"),
            _ => None,
        }
    }

    #[test]
    fn test_single_for_someone_else_is_forwarded() {
        let router = Router::new(1);
        let header = ProtocolHeader::single(9, 5);
        assert_eq!(router.decide(&header, routes), RoutingDecision::Forward("east"));
    }

    #[test]
    fn test_single_without_route_is_dropped() {
        let router = Router::new(1);
        let header = ProtocolHeader::single(9, 42);
        assert_eq!(
            router.decide(&header, routes),
            RoutingDecision::Drop(DropReason::NoRoute)
        );
    }

    #[test]
    fn test_single_for_us_is_local() {
        let router = Router::new(5);
        let header = ProtocolHeader::single(9, 5);
        // Never consults the route table for our own frames
        let decision = router.decide(&header, |_| -> Option<&str> { panic!("route lookup") });
        assert_eq!(decision, RoutingDecision::Local);
    }

    #[test]
    fn test_broadcast_floods() {
        let router = Router::new(1);
        let header = ProtocolHeader::broadcast(8);
        assert_eq!(router.decide(&header, routes), RoutingDecision::Flood);
    }

    #[test]
    fn test_neighbour_is_local() {
        let router = Router::new(1);
        let header = ProtocolHeader::neighbour(5, 77);
        assert_eq!(router.decide(&header, routes), RoutingDecision::Local);
    }

    #[test]
    fn test_outbound_targets() {
        let router = Router::new(1);
        assert_eq!(
            router.outbound(&ProtocolHeader::single(9, 6), routes),
            Outbound::Link("west")
        );
        assert_eq!(
            router.outbound(&ProtocolHeader::neighbour(5, 5), routes),
            Outbound::Link("east")
        );
        assert_eq!(
            router.outbound(&ProtocolHeader::neighbour(1, 0), routes),
            Outbound::AllLinks
        );
        assert_eq!(
            router.outbound(&ProtocolHeader::broadcast(8), routes),
            Outbound::AllLinks
        );
        assert_eq!(
            router.outbound(&ProtocolHeader::single(9, 99), routes),
            Outbound::Unreachable
        );
    }

    #[test]
    fn test_router_stats() {
        let mut router = Router::new(1);
        router.record(&RoutingDecision::Forward(3u8));
        router.record::<u8>(&RoutingDecision::Flood);
        router.record::<u8>(&RoutingDecision::Local);
        router.record_malformed();

        let stats = router.stats();
        assert_eq!(stats.packets_forwarded, 1);
        assert_eq!(stats.packets_flooded, 1);
        assert_eq!(stats.packets_local, 2);
        assert_eq!(stats.packets_dropped, 1);
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::NoRoute.to_string(), "no route to destination");
        assert_eq!(DropReason::Malformed.to_string(), "malformed frame");
    }
}
