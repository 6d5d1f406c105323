//! Error types for the platform runtime

use magique_proto::{NameError, PlatformName, ProtocolError};
use std::time::Duration;
use thiserror::Error;

/// Main error type for platform operations
#[derive(Debug, Error)]
pub enum PlatformError {
    /// An agent is already registered under this qualified name
    #[error("Agent already exists: {0}")]
    DuplicateAgent(String),

    /// Connecting to, reading from or writing to a peer failed
    #[error("Connection to {platform} failed: {reason}")]
    ConnectionFailure {
        /// Peer platform
        platform: String,
        /// What went wrong
        reason: String,
    },

    /// Unreadable stream content
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Agent class unknown or its factory refused the arguments
    #[error("Cannot instantiate agent '{name}' of class '{class_name}': {reason}")]
    DynamicInstantiation {
        /// Requested class
        class_name: String,
        /// Requested qualified name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Name does not follow the naming rules
    #[error(transparent)]
    MalformedName(#[from] NameError),

    /// Timeout errors
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// Operation not provided by this agent
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// No artifact stored under this name
    #[error("Unknown artifact: {0}")]
    MissingArtifact(String),

    /// The platform has been stopped or dropped
    #[error("Platform stopped")]
    PlatformStopped,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl PlatformError {
    /// Connection failure towards `platform`
    pub fn connection(platform: &PlatformName, reason: impl ToString) -> Self {
        Self::ConnectionFailure {
            platform: platform.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error concerns a single peer connection
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailure { .. } | Self::Timeout { .. } | Self::Io(_))
    }
}

impl From<rmp_serde::encode::Error> for PlatformError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Protocol(ProtocolError::from(err))
    }
}

impl From<rmp_serde::decode::Error> for PlatformError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Deserialization(format!("MessagePack decode error: {}", err))
    }
}
