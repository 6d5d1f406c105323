//! # Magique Protocol
//!
//! Wire messages, naming rules and the frame codec shared by every Magique
//! platform.

#![warn(missing_docs)]

/// Frame structure and serialization
pub mod frame;

/// Platform-to-platform message types
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Agent and platform naming
pub mod name;

/// Error types for protocol operations
pub mod error;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::{NameError, ProtocolError};
pub use frame::{Frame, FrameKind};
pub use message::{HandshakeInfo, RoutingMessage, WireMessage};
pub use name::{qualify, short_name, AgentName, PlatformName};
