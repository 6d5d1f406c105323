//! Platform-to-platform message types

use crate::{Frame, FrameKind, PlatformName, ProtocolError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content addressed to an agent, relayed unchanged between platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingMessage {
    /// Qualified name of the recipient agent
    pub recipient: String,
    /// Agent payload, never inspected by platforms
    pub content: Bytes,
}

impl RoutingMessage {
    /// Create a routing message
    pub fn new(recipient: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            recipient: recipient.into(),
            content: content.into(),
        }
    }
}

impl fmt::Display for RoutingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "to {} ({} bytes)", self.recipient, self.content.len())
    }
}

/// Announces where the sending platform listens so the callee can answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    /// Name of the platform being dialed
    pub recipient: String,
    /// Host the sender listens on
    pub hostname: String,
    /// Port the sender listens on
    pub port: u16,
}

impl HandshakeInfo {
    /// Handshake from `sender` to the platform named `recipient`
    pub fn new(recipient: &PlatformName, sender: &PlatformName) -> Self {
        Self {
            recipient: recipient.to_string(),
            hostname: sender.host().to_string(),
            port: sender.port(),
        }
    }

    /// Name of the announcing platform
    pub fn sender(&self) -> PlatformName {
        PlatformName::new(self.hostname.clone(), self.port)
    }
}

/// Every message that can travel on a platform connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Agent traffic
    Routing(RoutingMessage),
    /// Connection handshake
    Handshake(HandshakeInfo),
}

impl WireMessage {
    /// Frame kind used to tag this message
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Routing(_) => FrameKind::ROUTING,
            Self::Handshake(_) => FrameKind::HANDSHAKE,
        }
    }

    /// Encode into a frame at the given position on the connection
    pub fn to_frame(&self, sequence: u32) -> Result<Frame, ProtocolError> {
        let payload = match self {
            Self::Routing(msg) => rmp_serde::to_vec_named(msg)?,
            Self::Handshake(info) => rmp_serde::to_vec_named(info)?,
        };

        Ok(Frame::new(self.kind(), sequence, Bytes::from(payload)))
    }

    /// Decode the message carried by a frame.
    ///
    /// Returns `Ok(None)` for a kind this build does not know; a known kind
    /// with an unreadable payload is an error.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, ProtocolError> {
        let message = match frame.kind {
            FrameKind::ROUTING => Self::Routing(rmp_serde::from_slice(&frame.payload)?),
            FrameKind::HANDSHAKE => Self::Handshake(rmp_serde::from_slice(&frame.payload)?),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }
}

impl From<RoutingMessage> for WireMessage {
    fn from(msg: RoutingMessage) -> Self {
        Self::Routing(msg)
    }
}

impl From<HandshakeInfo> for WireMessage {
    fn from(info: HandshakeInfo) -> Self {
        Self::Handshake(info)
    }
}
