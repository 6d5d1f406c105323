//! Platform: local agents, message routing and lifecycle

use crate::agent::{DISCONNECT_FROM_PLATFORM, registered_short_name};
use crate::management::{management_name, PlatformAgent};
use crate::server::PlatformServer;
use crate::{Agent, AgentFactories, AgentRegistry, PlatformConfig, PlatformError, Result, TerminationAck};
use bytes::Bytes;
use magique_proto::{qualify, AgentName, NameError, PlatformName, RoutingMessage};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// What happened to a message handed to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Put in the inbox of this local agent
    Local(String),
    /// Queued on the connection to this platform
    Relayed(PlatformName),
    /// Addressed to nobody reachable; discarded
    Dropped,
}

/// Outcome of [`Platform::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Agents that confirmed termination within the grace period
    pub acknowledged: Vec<String>,
    /// Agents that did not
    pub unacknowledged: Vec<String>,
    /// Platforms whose outbound connection was closed
    pub disconnected: Vec<PlatformName>,
}

/// A running platform.
///
/// Cheap to clone; every clone drives the same platform.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

struct PlatformInner {
    name: PlatformName,
    config: Arc<PlatformConfig>,
    registry: AgentRegistry,
    server: Arc<PlatformServer>,
    factories: RwLock<AgentFactories>,
    management: Arc<PlatformAgent>,
    stopping: AtomicBool,
}

/// Non-owning reference to a platform, held by its agents
#[derive(Clone)]
pub struct PlatformHandle {
    inner: Weak<PlatformInner>,
    name: PlatformName,
}

impl PlatformHandle {
    /// The platform, unless it has been dropped
    pub fn upgrade(&self) -> Option<Platform> {
        self.inner.upgrade().map(|inner| Platform { inner })
    }

    /// Name of the platform
    pub fn name(&self) -> &PlatformName {
        &self.name
    }

    /// Route `content` to `recipient` through the platform
    pub async fn send(&self, recipient: &str, content: impl Into<Bytes>) -> Result<Delivery> {
        let platform = self.upgrade().ok_or(PlatformError::PlatformStopped)?;
        platform.treat_message(recipient, content.into()).await
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            inner: Weak::new(),
            name: PlatformName::new("detached", 0),
        }
    }
}

impl fmt::Debug for PlatformHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformHandle")
            .field("name", &self.name)
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Platform {
    /// Start a platform with the built-in agent classes
    pub async fn start(config: PlatformConfig) -> Result<Self> {
        Self::start_with_factories(config, AgentFactories::with_defaults()).await
    }

    /// Bind the listening port, start accepting peers and register the
    /// management agent
    pub async fn start_with_factories(config: PlatformConfig, factories: AgentFactories) -> Result<Self> {
        let (listener, name) = PlatformServer::bind(&config).await?;
        let config = Arc::new(config);

        let inner = Arc::new_cyclic(|weak: &Weak<PlatformInner>| {
            let handle = PlatformHandle {
                inner: weak.clone(),
                name: name.clone(),
            };

            PlatformInner {
                name: name.clone(),
                config: Arc::clone(&config),
                registry: AgentRegistry::new(),
                server: PlatformServer::new(name.clone(), Arc::clone(&config), handle.clone()),
                factories: RwLock::new(factories),
                management: PlatformAgent::new(management_name(&name), handle),
                stopping: AtomicBool::new(false),
            }
        });
        let platform = Self { inner };

        platform.inner.server.start(listener);

        let management = Arc::clone(&platform.inner.management);
        platform
            .inner
            .registry
            .insert(management.name().to_string(), management.clone() as Arc<dyn Agent>)
            .await?;
        management.start();

        info!("Platform {} started", platform.inner.name);
        Ok(platform)
    }

    /// Name of this platform, `"host:port"`
    pub fn name(&self) -> &PlatformName {
        &self.inner.name
    }

    /// Port the platform listens on
    pub fn port(&self) -> u16 {
        self.inner.name.port()
    }

    /// Configuration the platform was started with
    pub fn config(&self) -> &PlatformConfig {
        &self.inner.config
    }

    /// Non-owning handle for agents
    pub fn handle(&self) -> PlatformHandle {
        PlatformHandle {
            inner: Arc::downgrade(&self.inner),
            name: self.inner.name.clone(),
        }
    }

    /// The management agent
    pub fn management_agent(&self) -> &Arc<PlatformAgent> {
        &self.inner.management
    }

    /// Whether shutdown has begun
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    /// Register `agent` under its short name qualified by this platform.
    ///
    /// The agent is renamed, attached to the platform and connected to the
    /// management agent. Returns the registered agent.
    pub async fn add_agent<A>(&self, mut agent: A) -> Result<Arc<A>>
    where
        A: Agent + 'static,
    {
        let name = self.qualified_name(registered_short_name(&agent))?;
        self.check_vacant(&name).await?;

        self.attach(&mut agent, &name);
        let agent = Arc::new(agent);
        self.register(&name, Arc::clone(&agent) as Arc<dyn Agent>).await?;
        Ok(agent)
    }

    /// Instantiate an agent of class `class_name` and register it as `short_name`
    pub async fn create_agent(&self, class_name: &str, short_name: &str, args: Vec<Value>) -> Result<Arc<dyn Agent>> {
        let name = self.qualified_name(short_name)?;
        self.check_vacant(&name).await?;

        let mut agent = self
            .inner
            .factories
            .read()
            .await
            .instantiate(class_name, name.clone(), args)?;

        self.attach(agent.as_mut(), &name);
        let agent: Arc<dyn Agent> = Arc::from(agent);
        self.register(&name, Arc::clone(&agent)).await?;
        Ok(agent)
    }

    /// Add or replace the constructor for `class_name`
    pub async fn register_factory<F>(&self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(AgentName, Vec<Value>) -> std::result::Result<Box<dyn Agent>, String> + Send + Sync + 'static,
    {
        self.inner.factories.write().await.register(class_name, factory);
    }

    /// Unregister an agent by short or qualified name; absent names are ignored
    pub async fn remove_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        let key = qualify(name, &self.inner.name).to_string();
        let removed = self.inner.registry.remove(&key).await;
        if removed.is_some() {
            info!("Removed agent {}", key);
        }
        removed
    }

    /// Local agent by short or qualified name
    pub async fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        match self.inner.registry.get(name).await {
            Some(agent) => Some(agent),
            None => {
                self.inner
                    .registry
                    .get(&qualify(name, &self.inner.name).to_string())
                    .await
            }
        }
    }

    /// Qualified names of local agents, sorted
    pub async fn agent_names(&self) -> Vec<String> {
        self.inner.registry.names().await
    }

    /// Number of local agents, management agent included
    pub async fn agent_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Platforms with an outbound connection entry, sorted
    pub async fn connected_platforms(&self) -> Vec<PlatformName> {
        self.inner.server.agenda().names().await
    }

    /// Route `content` to the agent named `recipient`.
    ///
    /// Local agents get it in their inbox; anything addressed to another
    /// platform is relayed over a lazily opened connection.
    pub async fn treat_message(&self, recipient: &str, content: Bytes) -> Result<Delivery> {
        if let Some(agent) = self.inner.registry.get(recipient).await {
            agent.add_message(content);
            return Ok(Delivery::Local(recipient.to_string()));
        }

        if recipient == self.inner.name.to_string() {
            debug!("Dropping message addressed to the platform itself");
            return Ok(Delivery::Dropped);
        }

        let target = AgentName::parse(recipient)?;
        if target.platform() == &self.inner.name {
            warn!("No local agent {}, dropping message", recipient);
            return Ok(Delivery::Dropped);
        }
        if self.inner.server.is_own_address(target.platform()).await {
            warn!(
                "{} names this platform under another address, dropping message",
                recipient
            );
            return Ok(Delivery::Dropped);
        }

        let destination = target.platform().clone();
        let message = RoutingMessage::new(recipient, content);
        self.inner.server.send_message(&destination, message.into()).await?;
        Ok(Delivery::Relayed(destination))
    }

    /// Same as [`treat_message`](Self::treat_message)
    pub async fn send(&self, recipient: &str, content: impl Into<Bytes>) -> Result<Delivery> {
        self.treat_message(recipient, content.into()).await
    }

    /// Open the outbound connection to `platform` unless it exists already
    pub async fn connect(&self, platform: &str) -> Result<()> {
        let destination = PlatformName::parse(platform)?;
        if self.inner.server.agenda().contains(&destination).await
            || self.inner.server.is_own_address(&destination).await
        {
            return Ok(());
        }

        self.inner.server.connect(&destination).await
    }

    /// Close the connection to `platform` and tell local agents to forget it.
    ///
    /// Returns whether a connection existed.
    pub async fn disconnect_from(&self, platform: &str) -> Result<bool> {
        let destination = PlatformName::parse(platform)?;
        let existed = self.inner.server.disconnect(&destination).await;
        self.notify_disconnected(&destination).await;
        Ok(existed)
    }

    /// [`disconnect_from`](Self::disconnect_from) for every connected platform
    pub async fn disconnect_from_all(&self) -> Vec<PlatformName> {
        let closed = self.inner.server.disconnect_all().await;
        for destination in &closed {
            self.notify_disconnected(destination).await;
        }
        closed
    }

    /// Whether a bare socket connect to `platform` succeeds
    pub async fn ping(&self, platform: &str) -> Result<bool> {
        let destination = PlatformName::parse(platform)?;
        Ok(self.inner.server.ping(&destination).await)
    }

    /// Terminate every agent, close every connection and stop accepting.
    ///
    /// Agents get `shutdown_grace` in total to acknowledge. Calling this
    /// again returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            debug!("Platform {} is already stopping", self.inner.name);
            return report;
        }
        info!("Stopping platform {}", self.inner.name);

        let management_name = self.inner.management.name().to_string();
        let mut pending = Vec::new();
        for (name, agent) in self.inner.registry.snapshot().await {
            if name == management_name {
                continue;
            }
            let (ack, acknowledged) = TerminationAck::new();
            agent.request_termination(ack);
            pending.push((name, acknowledged));
        }

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        for (name, acknowledged) in pending {
            match timeout_at(deadline, acknowledged).await {
                Ok(Ok(())) => report.acknowledged.push(name),
                Ok(Err(_)) => {
                    warn!("Agent {} dropped its termination acknowledgement", name);
                    report.unacknowledged.push(name);
                }
                Err(_) => {
                    warn!("Agent {} did not acknowledge termination in time", name);
                    report.unacknowledged.push(name);
                }
            }
        }

        let (ack, acknowledged) = TerminationAck::new();
        self.inner.management.request_termination(ack);
        if timeout(self.inner.config.close_timeout, acknowledged).await.is_err() {
            warn!("Management agent did not stop in time");
        }

        report.disconnected = self.inner.server.disconnect_all().await;
        self.inner.server.halt().await;
        self.inner.registry.clear().await;

        report.acknowledged.sort();
        report.unacknowledged.sort();
        info!(
            "Platform {} stopped ({} agents acknowledged, {} did not)",
            self.inner.name,
            report.acknowledged.len(),
            report.unacknowledged.len()
        );
        report
    }

    /// [`shutdown`](Self::shutdown), then exit the process with status 1
    pub async fn stop(&self) {
        self.shutdown().await;
        std::process::exit(1);
    }

    fn qualified_name(&self, short_name: &str) -> Result<AgentName> {
        let name = qualify(short_name, &self.inner.name);
        if name.short().is_empty() || name.short().chars().any(char::is_whitespace) {
            return Err(NameError::Agent(name.to_string()).into());
        }
        Ok(name)
    }

    async fn check_vacant(&self, name: &AgentName) -> Result<()> {
        if self.is_stopping() {
            return Err(PlatformError::PlatformStopped);
        }
        if self.inner.registry.contains(&name.to_string()).await {
            return Err(PlatformError::DuplicateAgent(name.to_string()));
        }
        Ok(())
    }

    fn attach(&self, agent: &mut dyn Agent, name: &AgentName) {
        agent.set_name(name.clone());
        agent.set_platform(self.handle());
        agent.connect_to(self.inner.management.name());
    }

    async fn register(&self, name: &AgentName, agent: Arc<dyn Agent>) -> Result<()> {
        // Decided under the registry lock, so shutdown's snapshot either
        // includes the agent or the insert is refused
        self.inner
            .registry
            .insert_while(name.to_string(), agent, || !self.is_stopping())
            .await?;
        info!("Registered agent {}", name);
        Ok(())
    }

    async fn notify_disconnected(&self, destination: &PlatformName) {
        let management_name = self.inner.management.name();
        for (name, agent) in self.inner.registry.snapshot().await {
            if name != management_name {
                agent.perform(DISCONNECT_FROM_PLATFORM, vec![Value::String(destination.to_string())]);
            }
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("name", &self.inner.name)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
