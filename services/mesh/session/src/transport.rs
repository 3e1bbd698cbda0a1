//! Byte transports underneath a link.
//!
//! The engine only ever sees [`Transport`]: a non-blocking sink that reports
//! how much it can take. Inbound bytes and disconnects are pushed into the
//! engine by whoever owns it. The TCP adapter below does that through a
//! channel of [`TransportEvent`]s so a single task can own the mesh.

use crate::link::LinkId;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Read buffer size of the TCP reader task
const READ_CHUNK: usize = 4096;

/// Outbound side of one link
pub trait Transport {
    /// Offer `data`; returns how many bytes were accepted, 0 meaning "try later"
    fn write(&mut self, data: &[u8]) -> usize;

    /// Bytes the transport can accept right now
    fn space(&self) -> usize;

    /// Stop accepting data and tear the connection down
    fn close(&mut self);

    /// Whether the connection is still usable
    fn is_connected(&self) -> bool;
}

/// Source of the free-memory figure used for queue admission
pub trait MemoryMonitor {
    /// Bytes still available
    fn available_headroom(&self) -> usize;
}

/// Memory monitor for hosts without a meaningful limit
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedMemory;

impl MemoryMonitor for UnboundedMemory {
    fn available_headroom(&self) -> usize {
        usize::MAX
    }
}

/// Something happened on a socket owned by a reader or writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes arrived
    Data {
        /// Link the bytes belong to
        link: LinkId,
        /// Raw chunk, not aligned to frames
        data: Bytes,
    },
    /// The socket closed or failed
    Closed {
        /// Link that went away
        link: LinkId,
    },
}

/// Transport backed by a channel into a writer task
///
/// `space()` is the configured window minus the bytes handed to the writer
/// task and not yet written to the socket.
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    outstanding: Arc<AtomicUsize>,
    window: usize,
    reader: Option<JoinHandle<()>>,
}

impl ChannelTransport {
    /// Transport over an existing writer channel
    pub fn new(
        tx: mpsc::UnboundedSender<Bytes>,
        outstanding: Arc<AtomicUsize>,
        window: usize,
    ) -> Self {
        Self {
            tx: Some(tx),
            outstanding,
            window,
            reader: None,
        }
    }

    /// Bytes queued for the writer task
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Transport for ChannelTransport {
    fn write(&mut self, data: &[u8]) -> usize {
        let Some(tx) = &self.tx else {
            return 0;
        };
        self.outstanding.fetch_add(data.len(), Ordering::AcqRel);
        if tx.send(Bytes::copy_from_slice(data)).is_err() {
            self.outstanding.fetch_sub(data.len(), Ordering::AcqRel);
            self.tx = None;
            return 0;
        }
        data.len()
    }

    fn space(&self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        self.window.saturating_sub(self.outstanding())
    }

    fn close(&mut self) {
        self.tx = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start reader and writer tasks for `stream` on behalf of `link`
///
/// Received chunks and the final close are reported on `events`. The returned
/// transport feeds the writer task; dropping or closing it shuts the socket.
pub fn spawn_tcp_link(
    stream: TcpStream,
    link: LinkId,
    window: usize,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> ChannelTransport {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle on {}: {}", link, e);
    }
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let outstanding = Arc::new(AtomicUsize::new(0));

    let writer_outstanding = outstanding.clone();
    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = write_half.write_all(&chunk).await {
                warn!("Write on {} failed: {}", link, e);
                let _ = writer_events.send(TransportEvent::Closed { link });
                return;
            }
            writer_outstanding.fetch_sub(chunk.len(), Ordering::AcqRel);
        }
        let _ = write_half.shutdown().await;
        debug!("Writer for {} finished", link);
    });

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    debug!("Peer closed {}", link);
                    break;
                }
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(TransportEvent::Data { link, data }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Read on {} failed: {}", link, e);
                    break;
                }
            }
        }
        let _ = events.send(TransportEvent::Closed { link });
    });

    let mut transport = ChannelTransport::new(tx, outstanding, window);
    transport.reader = Some(reader);
    transport
}

/// Bind a TCP listener
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP peer
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_memory() {
        assert_eq!(UnboundedMemory.available_headroom(), usize::MAX);
    }

    #[test]
    fn test_channel_transport_window() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let mut transport = ChannelTransport::new(tx, outstanding.clone(), 10);

        assert_eq!(transport.space(), 10);
        assert_eq!(transport.write(b"abcdef"), 6);
        assert_eq!(transport.space(), 4);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"abcdef"));

        // Writer task reports progress through the shared counter
        outstanding.fetch_sub(6, Ordering::AcqRel);
        assert_eq!(transport.space(), 10);

        transport.close();
        assert!(!transport.is_connected());
        assert_eq!(transport.space(), 0);
        assert_eq!(transport.write(b"x"), 0);
    }

    #[test]
    fn test_channel_transport_detects_dropped_writer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut transport = ChannelTransport::new(tx, Arc::new(AtomicUsize::new(0)), 10);
        drop(rx);
        assert!(!transport.is_connected());
        assert_eq!(transport.write(b"abc"), 0);
    }

    #[tokio::test]
    async fn test_tcp_link_delivers_bytes_and_close() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(connect_tcp(addr), listener.accept());
        let client = client.unwrap();
        let (server, _) = accepted.unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut station = spawn_tcp_link(client, LinkId(1), 1024, events_tx.clone());
        let mut ap = spawn_tcp_link(server, LinkId(2), 1024, events_tx);

        assert_eq!(station.write(b"hello"), 5);

        let mut received = Vec::new();
        while received.len() < 5 {
            match events_rx.recv().await.unwrap() {
                TransportEvent::Data { link, data } => {
                    assert_eq!(link, LinkId(2));
                    received.extend_from_slice(&data);
                }
                TransportEvent::Closed { link } => panic!("unexpected close of {link}"),
            }
        }
        assert_eq!(received, b"hello");

        station.close();
        loop {
            if let TransportEvent::Closed { link } = events_rx.recv().await.unwrap() {
                assert_eq!(link, LinkId(2));
                break;
            }
        }
        ap.close();
    }
}
