//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A declared field runs past the end of the buffer
    #[error("truncated frame: need {needed} bytes at offset {offset}, {available} available")]
    TruncatedFrame {
        /// Offset of the field that could not be read
        offset: usize,
        /// Bytes the field needs
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// Frame contents disagree with what its header declares
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Unknown routing mode
    #[error("unknown routing mode {0}")]
    RoutingMode(u16),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),
}

impl WireError {
    /// Shorthand for [`WireError::MalformedFrame`]
    pub fn malformed(reason: impl Into<String>) -> Self {
        WireError::MalformedFrame(reason.into())
    }
}
