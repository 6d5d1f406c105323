//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stream ended in the middle of a frame
    #[error("Truncated frame: {buffered} bytes buffered at end of stream")]
    TruncatedFrame {
        /// Bytes left in the read buffer
        buffered: usize,
    },

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}

/// A platform or agent name that does not follow the naming rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// Agent name without exactly one `@`
    #[error("Malformed agent name '{0}': expected <short>@<host>:<port>")]
    Agent(String),

    /// Platform name without a trailing `:<port>`
    #[error("Malformed platform name '{0}': expected <host>:<port>")]
    Platform(String),
}
