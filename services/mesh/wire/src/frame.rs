//! Length-prefixed framing.
//!
//! Each frame is a `u32` little-endian length (which does not count itself)
//! followed by that many bytes of header and payload.

use crate::package::Package;
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame body accepted by default (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Prefix a frame body with its length
pub fn encode_frame(body: &[u8]) -> Result<Bytes, WireError> {
    let len = u32::try_from(body.len()).map_err(|_| WireError::Size(body.len()))?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32_le(len);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Encode a package into a complete frame
pub fn encode_package(package: &Package) -> Result<Bytes, WireError> {
    encode_frame(&package.encode()?)
}

/// Receive-side reassembly of frames from arbitrary byte chunks
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder rejecting frames larger than `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame body, if one has fully arrived
    ///
    /// A declared length above the limit means the stream can no longer be
    /// trusted to stay aligned and is reported as [`WireError::Size`].
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, WireError> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let frame_len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
            as usize;
        if frame_len > self.max_frame_size {
            return Err(WireError::Size(frame_len));
        }

        if self.buf.len() < LENGTH_PREFIX_SIZE + frame_len {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        let frame = self.buf.split_to(frame_len).freeze();
        trace!(len = frame_len, buffered = self.buf.len(), "reassembled frame");
        Ok(Some(frame))
    }

    /// Append `chunk` and pop every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, WireError> {
        self.extend(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop anything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
