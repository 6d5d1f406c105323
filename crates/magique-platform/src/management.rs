//! Management agent hosted by every platform

use crate::agent::{CONNECT_TO, DIE, DISCONNECT_AND_DIE};
use crate::{Agent, Delivery, PlatformError, PlatformHandle, Result, TerminationAck};
use async_trait::async_trait;
use bytes::Bytes;
use magique_proto::{qualify, AgentName, PlatformName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Short name of the management agent on every platform
pub const MANAGEMENT_AGENT_NAME: &str = "PlatformAgent";

/// Qualified name of the management agent of `platform`
pub fn management_name(platform: &PlatformName) -> AgentName {
    AgentName::new(MANAGEMENT_AGENT_NAME, platform.clone())
}

/// Named blob of code or data shipped between platforms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Lookup key
    pub name: String,
    /// Contents
    pub bytes: Bytes,
}

/// Content understood by a management agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagementCommand {
    /// Instantiate and register an agent on the receiving platform
    CreateAgent {
        /// Factory class
        class_name: String,
        /// Short name to register under
        short_name: String,
        /// Constructor arguments
        args: Vec<Value>,
    },
    /// Ask a local agent to add an acquaintance
    ConnectAgentTo {
        /// Local agent, short or qualified
        agent: String,
        /// Acquaintance to add
        other: String,
    },
    /// Store an artifact
    AddArtifact(Artifact),
    /// Stop the receiving platform
    KillPlatform,
}

impl ManagementCommand {
    /// Serialize to MessagePack
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(self)?))
    }

    /// Deserialize from MessagePack
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[derive(Debug)]
enum Control {
    Content(Bytes),
    Perform { operation: String, args: Vec<Value> },
    Terminate(TerminationAck),
}

type Artifacts = Arc<RwLock<HashMap<String, Artifact>>>;

/// Agent that creates agents, wires acquaintances and stores artifacts on
/// behalf of remote platforms
pub struct PlatformAgent {
    name: String,
    platform: PlatformHandle,
    artifacts: Artifacts,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
}

impl PlatformAgent {
    pub(crate) fn new(name: AgentName, platform: PlatformHandle) -> Arc<Self> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            name: name.to_string(),
            platform,
            artifacts: Arc::new(RwLock::new(HashMap::new())),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
        })
    }

    /// Spawn the command loop; later calls do nothing
    pub(crate) fn start(&self) {
        let control_rx = self.control_rx.lock().ok().and_then(|mut slot| slot.take());
        let Some(control_rx) = control_rx else {
            return;
        };

        tokio::spawn(run(
            self.name.clone(),
            self.platform.clone(),
            Arc::clone(&self.artifacts),
            control_rx,
        ));
    }

    /// Store an artifact locally, replacing one with the same name
    pub async fn add_artifact(&self, name: impl Into<String>, bytes: impl Into<Bytes>) {
        let artifact = Artifact {
            name: name.into(),
            bytes: bytes.into(),
        };
        store(&self.artifacts, artifact).await;
    }

    /// Artifact stored under `name`
    pub async fn artifact(&self, name: &str) -> Option<Artifact> {
        self.artifacts.read().await.get(name).cloned()
    }

    /// Names of stored artifacts, sorted
    pub async fn artifact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send the artifact `name` to the platform hosting `to`.
    ///
    /// `to` is an agent name or a platform name.
    pub async fn give_artifact(&self, name: &str, to: &str) -> Result<Delivery> {
        let artifact = self
            .artifact(name)
            .await
            .ok_or_else(|| PlatformError::MissingArtifact(name.to_string()))?;

        let platform = if to.contains('@') {
            AgentName::parse(to)?.platform().clone()
        } else {
            PlatformName::parse(to)?
        };
        self.command(&platform, &ManagementCommand::AddArtifact(artifact)).await
    }

    /// Ask `platform` to create an agent; returns the name it will get
    pub async fn create_distant_agent(
        &self,
        class_name: &str,
        short_name: &str,
        platform: &str,
        args: Vec<Value>,
    ) -> Result<AgentName> {
        let platform = PlatformName::parse(platform)?;
        let command = ManagementCommand::CreateAgent {
            class_name: class_name.to_string(),
            short_name: short_name.to_string(),
            args,
        };

        self.command(&platform, &command).await?;
        Ok(qualify(short_name, &platform))
    }

    /// Make `agent` acquainted with `other`, wherever `agent` lives
    pub async fn connect_agent_to(&self, agent: &str, other: &str) -> Result<Delivery> {
        let target = AgentName::parse(agent)?;
        let command = ManagementCommand::ConnectAgentTo {
            agent: agent.to_string(),
            other: other.to_string(),
        };
        self.command(target.platform(), &command).await
    }

    /// Ask `platform` to stop
    pub async fn kill_platform(&self, platform: &str) -> Result<Delivery> {
        let platform = PlatformName::parse(platform)?;
        self.command(&platform, &ManagementCommand::KillPlatform).await
    }

    async fn command(&self, platform: &PlatformName, command: &ManagementCommand) -> Result<Delivery> {
        let recipient = management_name(platform).to_string();
        self.platform.send(&recipient, command.encode()?).await
    }

    fn control(&self, control: Control) {
        if self.control_tx.send(control).is_err() {
            debug!("Management agent {} has stopped", self.name);
        }
    }
}

#[async_trait]
impl Agent for PlatformAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: AgentName) {
        self.name = name.to_string();
    }

    fn set_platform(&mut self, platform: PlatformHandle) {
        self.platform = platform;
    }

    fn connect_to(&mut self, agent: &str) {
        debug!("Management agent ignores acquaintance {}", agent);
    }

    fn add_message(&self, content: Bytes) {
        self.control(Control::Content(content));
    }

    fn perform(&self, operation: &str, args: Vec<Value>) {
        self.control(Control::Perform {
            operation: operation.to_string(),
            args,
        });
    }

    fn request_termination(&self, ack: TerminationAck) {
        if let Err(mpsc::error::SendError(Control::Terminate(ack))) = self.control_tx.send(Control::Terminate(ack)) {
            ack.acknowledge();
        }
    }
}

async fn run(
    name: String,
    platform: PlatformHandle,
    artifacts: Artifacts,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    debug!("Management agent {} started", name);

    while let Some(event) = control.recv().await {
        match event {
            Control::Content(content) => handle_content(&platform, &artifacts, &content).await,
            Control::Perform { operation, .. } if operation == DIE || operation == DISCONNECT_AND_DIE => break,
            Control::Perform { operation, args } if operation == CONNECT_TO => {
                debug!("Management agent ignores {} {:?}", operation, args);
            }
            Control::Perform { operation, .. } => {
                warn!("Management agent has no operation {}", operation);
            }
            Control::Terminate(ack) => {
                ack.acknowledge();
                break;
            }
        }
    }

    debug!("Management agent {} stopped", name);
}

async fn handle_content(platform: &PlatformHandle, artifacts: &Artifacts, content: &[u8]) {
    let command = match ManagementCommand::decode(content) {
        Ok(command) => command,
        Err(e) => {
            warn!("Dropping unreadable management message: {}", e);
            return;
        }
    };

    match command {
        ManagementCommand::AddArtifact(artifact) => store(artifacts, artifact).await,
        other => execute(platform, other).await,
    }
}

async fn execute(platform: &PlatformHandle, command: ManagementCommand) {
    let Some(local) = platform.upgrade() else {
        debug!("Platform dropped, ignoring {:?}", command);
        return;
    };

    match command {
        ManagementCommand::CreateAgent {
            class_name,
            short_name,
            args,
        } => match local.create_agent(&class_name, &short_name, args).await {
            Ok(agent) => info!("Created agent {} of class {}", agent.name(), class_name),
            Err(e) => warn!("Cannot create agent {}: {}", short_name, e),
        },
        ManagementCommand::ConnectAgentTo { agent, other } => match local.agent(&agent).await {
            Some(found) => found.perform(CONNECT_TO, vec![Value::String(other)]),
            None => warn!("Cannot connect unknown agent {} to {}", agent, other),
        },
        ManagementCommand::KillPlatform => {
            info!("Platform {} asked to stop", local.name());
            // Shutdown waits for this agent to terminate, so it cannot run inline
            tokio::spawn(async move { local.stop().await });
        }
        ManagementCommand::AddArtifact(_) => {}
    }
}

async fn store(artifacts: &Artifacts, artifact: Artifact) {
    info!("Stored artifact {} ({} bytes)", artifact.name, artifact.bytes.len());
    artifacts.write().await.insert(artifact.name.clone(), artifact);
}
