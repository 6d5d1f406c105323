//! Agent contract consumed by the platform, plus a basic inbox agent

use crate::{Delivery, PlatformError, PlatformHandle, Result};
use async_trait::async_trait;
use bytes::Bytes;
use magique_proto::name::short_name;
use magique_proto::{AgentName, PlatformName};
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Operation performed by every agent when its platform stops
pub const DISCONNECT_AND_DIE: &str = "disconnectAndDie";

/// Operation performed by the management agent when its platform stops
pub const DIE: &str = "die";

/// Operation performed by agents when their platform drops a peer
pub const DISCONNECT_FROM_PLATFORM: &str = "disconnectFromPlatform";

/// Operation asking an agent to add an acquaintance
pub const CONNECT_TO: &str = "connectTo";

/// Acknowledgement an agent sends back once it has terminated
#[derive(Debug)]
pub struct TerminationAck {
    tx: oneshot::Sender<()>,
}

impl TerminationAck {
    /// Create an acknowledgement and the receiver waiting for it
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Confirm termination
    pub fn acknowledge(self) {
        // The platform may have stopped waiting already
        let _ = self.tx.send(());
    }
}

/// An addressable unit of behaviour hosted by a platform.
///
/// Only the methods below are used by the platform. How an agent handles
/// delivered content, its skills and its request correlation are up to the
/// implementation.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Current name, qualified once the agent is registered
    fn name(&self) -> &str;

    /// Rename the agent; called once with the qualified name on registration
    fn set_name(&mut self, name: AgentName);

    /// Attach the hosting platform
    fn set_platform(&mut self, platform: PlatformHandle);

    /// Record `agent` as an acquaintance
    fn connect_to(&mut self, agent: &str);

    /// Deliver content to the agent's inbox; must not block
    fn add_message(&self, content: Bytes);

    /// Fire-and-forget request
    fn perform(&self, operation: &str, args: Vec<Value>);

    /// Request that suspends the caller until `agent` answers
    async fn ask_now(&self, agent: &str, operation: &str, args: Vec<Value>) -> Result<Value> {
        let _ = (agent, args);
        Err(PlatformError::Unsupported(operation.to_string()))
    }

    /// Terminate, then acknowledge through `ack`
    fn request_termination(&self, ack: TerminationAck) {
        self.perform(DISCONNECT_AND_DIE, Vec::new());
        ack.acknowledge();
    }
}

/// Something that happened to a [`BasicAgent`]
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Content delivered by the platform
    Message(Bytes),
    /// Operation requested through [`Agent::perform`]
    Perform {
        /// Operation name
        operation: String,
        /// Positional arguments
        args: Vec<Value>,
    },
}

/// Receiving end of a [`BasicAgent`]'s inbox
pub type Inbox = mpsc::UnboundedReceiver<AgentEvent>;

/// Agent that keeps acquaintances and surfaces everything else as events
pub struct BasicAgent {
    name: String,
    platform: Option<PlatformHandle>,
    acquaintances: Mutex<Vec<String>>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl BasicAgent {
    /// Agent that only logs what it receives
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platform: None,
            acquaintances: Mutex::new(Vec::new()),
            events: None,
        }
    }

    /// Agent whose deliveries and requests are readable from the returned inbox
    pub fn with_inbox(name: impl Into<String>) -> (Self, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut agent = Self::new(name);
        agent.events = Some(tx);
        (agent, rx)
    }

    /// Names this agent is connected to
    pub fn acquaintances(&self) -> Vec<String> {
        self.acquaintances
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Hosting platform, once registered
    pub fn platform(&self) -> Option<&PlatformHandle> {
        self.platform.as_ref()
    }

    /// Send content to another agent through the hosting platform
    pub async fn send(&self, recipient: &str, content: impl Into<Bytes>) -> Result<Delivery> {
        let platform = self.platform.as_ref().ok_or(PlatformError::PlatformStopped)?;
        platform.send(recipient, content).await
    }

    fn add_acquaintance(&self, agent: &str) {
        if let Ok(mut list) = self.acquaintances.lock() {
            if !list.iter().any(|known| known == agent) {
                list.push(agent.to_string());
            }
        }
    }

    fn forget_platform(&self, platform: &str) {
        let Ok(platform) = PlatformName::parse(platform) else {
            return;
        };
        if let Ok(mut list) = self.acquaintances.lock() {
            list.retain(|known| {
                AgentName::parse(known).map_or(true, |name| name.platform() != &platform)
            });
        }
    }

    fn emit(&self, event: AgentEvent) {
        match &self.events {
            Some(events) => {
                if events.send(event).is_err() {
                    debug!(agent = %self.name, "Inbox dropped, event discarded");
                }
            }
            None => info!(agent = %self.name, "Received {:?}", event),
        }
    }
}

#[async_trait]
impl Agent for BasicAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: AgentName) {
        self.name = name.to_string();
    }

    fn set_platform(&mut self, platform: PlatformHandle) {
        self.platform = Some(platform);
    }

    fn connect_to(&mut self, agent: &str) {
        self.add_acquaintance(agent);
    }

    fn add_message(&self, content: Bytes) {
        self.emit(AgentEvent::Message(content));
    }

    fn perform(&self, operation: &str, args: Vec<Value>) {
        match (operation, args.first()) {
            (CONNECT_TO, Some(Value::String(agent))) => self.add_acquaintance(agent),
            (DISCONNECT_FROM_PLATFORM, Some(Value::String(platform))) => self.forget_platform(platform),
            _ => {}
        }
        self.emit(AgentEvent::Perform {
            operation: operation.to_string(),
            args,
        });
    }
}

/// Factory for the built-in `"basic"` class: string arguments become acquaintances
pub(crate) fn basic_factory(name: AgentName, args: Vec<Value>) -> std::result::Result<Box<dyn Agent>, String> {
    let mut agent = BasicAgent::new(name.to_string());
    for arg in args {
        match arg {
            Value::String(other) => agent.connect_to(&other),
            other => return Err(format!("expected an acquaintance name, got {}", other)),
        }
    }
    Ok(Box::new(agent))
}

/// Short name an agent will be registered under
pub(crate) fn registered_short_name(agent: &dyn Agent) -> &str {
    short_name(agent.name())
}
