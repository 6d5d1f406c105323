//! Platform-to-platform connections
//!
//! Sockets are one-way: a platform writes to a peer only over the outbound
//! connection it dialed, and reads only from connections the peer dialed.
//! The handshake written first on every outbound connection lets the callee
//! register a return path without dialing first.

/// Reader side, one per accepted socket
pub mod inbound;

/// Writer side, one per destination platform
pub mod outbound;

pub use inbound::{ConnectionInbound, InboundHandler};
pub use outbound::ConnectionOutbound;
