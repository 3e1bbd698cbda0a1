//! Packages: a protocol header plus a typed payload.
//!
//! Payload layouts (after the header):
//!
//! ```text
//! NodeSyncRequest/Reply : u32 from | NodeTree
//! TimeSync/TimeDelay    : u32 from | i16 kind | u32 t0 | u32 t1 | u32 t2
//! Single/Broadcast      : u32 from | u16 len | msg
//! MeshIdAnnounce        : u16 id | u32 from | u32 weight
//! user types            : opaque
//! ```

use crate::codec::{put_string, Reader, WireFormat};
use crate::header::{ProtocolHeader, RoutingMode};
use crate::tree::NodeTree;
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};

/// Mesh id announcement
pub const TYPE_MESH_ID: u16 = 1;
/// Round-trip delay measurement
pub const TYPE_TIME_DELAY: u16 = 3;
/// Neighbour clock synchronisation
pub const TYPE_TIME_SYNC: u16 = 4;
/// Node tree request
pub const TYPE_NODE_SYNC_REQUEST: u16 = 5;
/// Node tree reply
pub const TYPE_NODE_SYNC_REPLY: u16 = 6;
/// Application broadcast
pub const TYPE_BROADCAST: u16 = 8;
/// Application unicast
pub const TYPE_SINGLE: u16 = 9;
/// First type code available to applications
pub const TYPE_USER_MIN: u16 = 20;

/// Node tree snapshot sent by `from`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSync {
    /// Sender
    pub from: u32,
    /// Sender's view, rooted at the sender
    pub tree: NodeTree,
}

/// Stage of a time exchange
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncKind {
    /// Something went wrong on the other side
    Error = -1,
    /// Ask the peer to start an exchange
    SyncRequest = 0,
    /// Carries the requester's send time
    Request = 1,
    /// Carries the responder's receive and send times
    Reply = 2,
}

impl TryFrom<i16> for TimeSyncKind {
    type Error = WireError;

    fn try_from(value: i16) -> Result<Self, WireError> {
        match value {
            -1 => Ok(TimeSyncKind::Error),
            0 => Ok(TimeSyncKind::SyncRequest),
            1 => Ok(TimeSyncKind::Request),
            2 => Ok(TimeSyncKind::Reply),
            _ => Err(WireError::malformed(format!("unknown time sync kind {value}"))),
        }
    }
}

/// Timestamps of one exchange, in node-time milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncMessage {
    /// Stage
    pub kind: TimeSyncKind,
    /// Requester send time
    pub t0: u32,
    /// Responder receive time
    pub t1: u32,
    /// Responder send time
    pub t2: u32,
}

impl TimeSyncMessage {
    /// Ask the peer to start an exchange
    pub fn sync_request() -> Self {
        Self {
            kind: TimeSyncKind::SyncRequest,
            t0: 0,
            t1: 0,
            t2: 0,
        }
    }

    /// Start an exchange at `t0`
    pub fn request(t0: u32) -> Self {
        Self {
            kind: TimeSyncKind::Request,
            t0,
            t1: 0,
            t2: 0,
        }
    }

    /// Answer a request received at `t1` and sent back at `t2`
    pub fn reply(&self, t1: u32, t2: u32) -> Self {
        Self {
            kind: TimeSyncKind::Reply,
            t0: self.t0,
            t1,
            t2,
        }
    }
}

/// Time exchange sent by `from`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    /// Sender
    pub from: u32,
    /// Timestamps
    pub msg: TimeSyncMessage,
}

/// Application text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Original sender
    pub from: u32,
    /// Message body
    pub msg: String,
}

/// Mesh id announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshIdAnnounce {
    /// Id the sender currently holds
    pub id: u16,
    /// Sender
    pub from: u32,
    /// Weight backing that id
    pub weight: u32,
}

/// Typed payload selected by the header's package type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// [`TYPE_NODE_SYNC_REQUEST`]
    NodeSyncRequest(NodeSync),
    /// [`TYPE_NODE_SYNC_REPLY`]
    NodeSyncReply(NodeSync),
    /// [`TYPE_TIME_SYNC`]
    TimeSync(TimeSync),
    /// [`TYPE_TIME_DELAY`]
    TimeDelay(TimeSync),
    /// [`TYPE_SINGLE`]
    Single(TextMessage),
    /// [`TYPE_BROADCAST`]
    Broadcast(TextMessage),
    /// [`TYPE_MESH_ID`]
    MeshId(MeshIdAnnounce),
    /// Any other type, kept opaque
    Raw(Bytes),
}

/// Application-defined package with its own type code
pub trait UserPackage: Sized {
    /// Type code, at least [`TYPE_USER_MIN`]
    const TYPE: u16;
    /// How the package is routed
    const ROUTING: RoutingMode;

    /// Append the payload
    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError>;

    /// Read the payload
    fn decode_body(reader: &mut Reader<'_>) -> Result<Self, WireError>;
}

/// One decoded or to-be-sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Header
    pub header: ProtocolHeader,
    /// Payload
    pub payload: Payload,
}

impl Package {
    /// NodeSync request from `from` to neighbour `dest`
    pub fn node_sync_request(from: u32, dest: u32, tree: NodeTree) -> Self {
        Self {
            header: ProtocolHeader::neighbour(TYPE_NODE_SYNC_REQUEST, dest),
            payload: Payload::NodeSyncRequest(NodeSync { from, tree }),
        }
    }

    /// NodeSync reply from `from` to neighbour `dest`
    pub fn node_sync_reply(from: u32, dest: u32, tree: NodeTree) -> Self {
        Self {
            header: ProtocolHeader::neighbour(TYPE_NODE_SYNC_REPLY, dest),
            payload: Payload::NodeSyncReply(NodeSync { from, tree }),
        }
    }

    /// Clock exchange with neighbour `dest`
    pub fn time_sync(from: u32, dest: u32, msg: TimeSyncMessage) -> Self {
        Self {
            header: ProtocolHeader::neighbour(TYPE_TIME_SYNC, dest),
            payload: Payload::TimeSync(TimeSync { from, msg }),
        }
    }

    /// Delay measurement routed to `dest`
    pub fn time_delay(from: u32, dest: u32, msg: TimeSyncMessage) -> Self {
        Self {
            header: ProtocolHeader::single(TYPE_TIME_DELAY, dest),
            payload: Payload::TimeDelay(TimeSync { from, msg }),
        }
    }

    /// Application message routed to `dest`
    pub fn single(from: u32, dest: u32, msg: impl Into<String>) -> Self {
        Self {
            header: ProtocolHeader::single(TYPE_SINGLE, dest),
            payload: Payload::Single(TextMessage {
                from,
                msg: msg.into(),
            }),
        }
    }

    /// Application message flooded to everyone
    pub fn broadcast(from: u32, msg: impl Into<String>) -> Self {
        Self {
            header: ProtocolHeader::broadcast(TYPE_BROADCAST),
            payload: Payload::Broadcast(TextMessage {
                from,
                msg: msg.into(),
            }),
        }
    }

    /// Mesh id announcement for every neighbour
    pub fn mesh_id(announce: MeshIdAnnounce) -> Self {
        Self {
            header: ProtocolHeader::neighbour(TYPE_MESH_ID, 0),
            payload: Payload::MeshId(announce),
        }
    }

    /// Wrap an application package; `dest` is ignored unless it is routed
    pub fn user<T: UserPackage>(value: &T, dest: u32) -> Result<Self, WireError> {
        let mut body = BytesMut::new();
        value.encode_body(&mut body)?;
        let dest = match T::ROUTING {
            RoutingMode::Broadcast => 0,
            _ => dest,
        };
        Ok(Self {
            header: ProtocolHeader::new(T::TYPE, T::ROUTING, dest),
            payload: Payload::Raw(body.freeze()),
        })
    }

    /// Package type code
    pub fn package_type(&self) -> u16 {
        self.header.package_type
    }

    /// Routing mode
    pub fn routing(&self) -> RoutingMode {
        self.header.routing
    }

    /// Destination node
    pub fn dest(&self) -> u32 {
        self.header.dest
    }

    /// Sender, when the payload names one
    pub fn from(&self) -> Option<u32> {
        match &self.payload {
            Payload::NodeSyncRequest(s) | Payload::NodeSyncReply(s) => Some(s.from),
            Payload::TimeSync(t) | Payload::TimeDelay(t) => Some(t.from),
            Payload::Single(m) | Payload::Broadcast(m) => Some(m.from),
            Payload::MeshId(a) => Some(a.from),
            Payload::Raw(_) => None,
        }
    }

    /// Encode header and payload, without the frame length prefix
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(64);
        self.header.encode(&mut buf)?;
        match &self.payload {
            Payload::NodeSyncRequest(sync) | Payload::NodeSyncReply(sync) => {
                buf.put_u32_le(sync.from);
                sync.tree.encode(&mut buf)?;
            }
            Payload::TimeSync(time) | Payload::TimeDelay(time) => {
                buf.put_u32_le(time.from);
                buf.put_i16_le(time.msg.kind as i16);
                buf.put_u32_le(time.msg.t0);
                buf.put_u32_le(time.msg.t1);
                buf.put_u32_le(time.msg.t2);
            }
            Payload::Single(text) | Payload::Broadcast(text) => {
                buf.put_u32_le(text.from);
                put_string(&mut buf, &text.msg)?;
            }
            Payload::MeshId(announce) => {
                buf.put_u16_le(announce.id);
                buf.put_u32_le(announce.from);
                buf.put_u32_le(announce.weight);
            }
            Payload::Raw(body) => buf.put_slice(body),
        }
        Ok(buf.freeze())
    }

    /// Decode a frame body (header and payload)
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(body);
        let header = ProtocolHeader::decode(&mut reader)?;
        let payload = match header.package_type {
            TYPE_NODE_SYNC_REQUEST => Payload::NodeSyncRequest(decode_node_sync(&mut reader)?),
            TYPE_NODE_SYNC_REPLY => Payload::NodeSyncReply(decode_node_sync(&mut reader)?),
            TYPE_TIME_SYNC => Payload::TimeSync(decode_time_sync(&mut reader)?),
            TYPE_TIME_DELAY => Payload::TimeDelay(decode_time_sync(&mut reader)?),
            TYPE_SINGLE => Payload::Single(decode_text(&mut reader)?),
            TYPE_BROADCAST => Payload::Broadcast(decode_text(&mut reader)?),
            TYPE_MESH_ID => Payload::MeshId(MeshIdAnnounce {
                id: reader.u16()?,
                from: reader.u32()?,
                weight: reader.u32()?,
            }),
            _ => Payload::Raw(Bytes::copy_from_slice(reader.rest())),
        };
        reader.finish()?;
        Ok(Self { header, payload })
    }

    /// Decode an opaque payload as application package `T`
    pub fn decode_user<T: UserPackage>(&self) -> Result<T, WireError> {
        if self.header.package_type != T::TYPE {
            return Err(WireError::malformed(format!(
                "package type {} is not {}",
                self.header.package_type,
                T::TYPE
            )));
        }
        match &self.payload {
            Payload::Raw(body) => {
                let mut reader = Reader::new(body);
                let value = T::decode_body(&mut reader)?;
                reader.finish()?;
                Ok(value)
            }
            _ => Err(WireError::malformed("payload is not opaque")),
        }
    }
}

fn decode_node_sync(reader: &mut Reader<'_>) -> Result<NodeSync, WireError> {
    let from = reader.u32()?;
    let tree = NodeTree::decode(reader)?;
    if tree.node_id != from {
        return Err(WireError::malformed(format!(
            "node sync from {from} describes node {}",
            tree.node_id
        )));
    }
    Ok(NodeSync { from, tree })
}

fn decode_time_sync(reader: &mut Reader<'_>) -> Result<TimeSync, WireError> {
    let from = reader.u32()?;
    let kind = TimeSyncKind::try_from(reader.i16()?)?;
    Ok(TimeSync {
        from,
        msg: TimeSyncMessage {
            kind,
            t0: reader.u32()?,
            t1: reader.u32()?,
            t2: reader.u32()?,
        },
    })
}

fn decode_text(reader: &mut Reader<'_>) -> Result<TextMessage, WireError> {
    Ok(TextMessage {
        from: reader.u32()?,
        msg: reader.string()?,
    })
}
