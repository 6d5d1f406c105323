//! # Magique Platform
//!
//! Runtime substrate for distributed multi-agent systems. Each platform hosts
//! agents, routes messages between them and relays messages addressed to
//! agents on other platforms over lazily opened TCP connections.
//!
//! Agents are named `"<short>@<host>:<port>"`; the suffix is the name of the
//! platform hosting them, so routing needs no directory service.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use magique_proto as proto;

mod address;

/// Agent contract and the built-in basic agent
pub mod agent;

/// Outbound connection cache
pub mod agenda;

/// Platform configuration
pub mod config;

/// Platform-to-platform connections
pub mod connection;

/// Error types for the platform runtime
pub mod error;

/// Agent constructors by class name
pub mod factory;

/// Management agent
pub mod management;

/// Platform lifecycle and routing
pub mod platform;

/// Locally hosted agents
pub mod registry;

/// Accept loop and outbound connection management
pub mod server;

pub use agent::{Agent, AgentEvent, BasicAgent, Inbox, TerminationAck};
pub use agenda::Agenda;
pub use config::{PlatformConfig, DEFAULT_PORT};
pub use connection::{ConnectionInbound, ConnectionOutbound, InboundHandler};
pub use error::PlatformError;
pub use factory::{AgentFactories, AgentFactory, BASIC_AGENT_CLASS};
pub use management::{Artifact, ManagementCommand, PlatformAgent, MANAGEMENT_AGENT_NAME};
pub use platform::{Delivery, Platform, PlatformHandle, ShutdownReport};
pub use registry::AgentRegistry;
pub use server::PlatformServer;

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;
