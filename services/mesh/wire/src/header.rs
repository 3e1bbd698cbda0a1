//! Protocol header carried by every frame.
//!
//! ```text
//! +------------+---------------+------------+
//! | u16 type   | u16 routing   | u32 dest   |
//! +------------+---------------+------------+
//! ```

use crate::codec::{Reader, WireFormat};
use crate::WireError;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 8;

/// How a frame travels through the mesh
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingMode {
    /// Handled by the immediate peer only
    Neighbour = 0,
    /// Unicast, forwarded hop by hop towards `dest`
    Single = 1,
    /// Flooded to every link and handled everywhere
    Broadcast = 2,
}

impl TryFrom<u16> for RoutingMode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RoutingMode::Neighbour),
            1 => Ok(RoutingMode::Single),
            2 => Ok(RoutingMode::Broadcast),
            _ => Err(WireError::RoutingMode(value)),
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMode::Neighbour => write!(f, "neighbour"),
            RoutingMode::Single => write!(f, "single"),
            RoutingMode::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Fixed header present on every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolHeader {
    /// Package type code
    pub package_type: u16,
    /// Routing mode
    pub routing: RoutingMode,
    /// Destination node, meaningful for [`RoutingMode::Single`] only
    pub dest: u32,
}

impl ProtocolHeader {
    /// Create a header
    pub fn new(package_type: u16, routing: RoutingMode, dest: u32) -> Self {
        Self {
            package_type,
            routing,
            dest,
        }
    }

    /// Header for a package handled by the direct peer
    pub fn neighbour(package_type: u16, dest: u32) -> Self {
        Self::new(package_type, RoutingMode::Neighbour, dest)
    }

    /// Header for a package routed to `dest`
    pub fn single(package_type: u16, dest: u32) -> Self {
        Self::new(package_type, RoutingMode::Single, dest)
    }

    /// Header for a flooded package
    pub fn broadcast(package_type: u16) -> Self {
        Self::new(package_type, RoutingMode::Broadcast, 0)
    }

    /// Decode only the header of a frame body, leaving the payload untouched
    pub fn peek(body: &[u8]) -> Result<Self, WireError> {
        Self::decode(&mut Reader::new(body))
    }
}

impl WireFormat for ProtocolHeader {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.reserve(HEADER_SIZE);
        buf.put_u16_le(self.package_type);
        buf.put_u16_le(self.routing as u16);
        buf.put_u32_le(self.dest);
        Ok(())
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let package_type = reader.u16()?;
        let routing = RoutingMode::try_from(reader.u16()?)?;
        let dest = reader.u32()?;
        Ok(Self {
            package_type,
            routing,
            dest,
        })
    }
}
