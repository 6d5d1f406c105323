//! Unit of transfer on a platform connection

use crate::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Discriminates the message carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameKind(pub u8);

impl FrameKind {
    /// Message addressed to an agent
    pub const ROUTING: Self = Self(1);
    /// Return-path announcement sent first on every outbound connection
    pub const HANDSHAKE: Self = Self(2);

    /// Whether this build knows how to decode the kind
    pub fn is_known(self) -> bool {
        self == Self::ROUTING || self == Self::HANDSHAKE
    }
}

/// One kind-tagged message with its position on the connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Message kind
    pub kind: FrameKind,
    /// Position of this frame on its connection, starting at 0
    pub sequence: u32,
    /// MessagePack-encoded message
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame
    pub fn new(kind: FrameKind, sequence: u32, payload: Bytes) -> Self {
        Self {
            kind,
            sequence,
            payload,
        }
    }

    /// MessagePack body, without the length prefix
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Parse a MessagePack body
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
