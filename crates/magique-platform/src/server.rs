//! Accept loop and outbound connection management for one platform

use crate::address::{announced_host, reaches_listener};
use crate::connection::{ConnectionInbound, ConnectionOutbound, InboundHandler};
use crate::{Agenda, PlatformConfig, PlatformError, PlatformHandle, Result};
use async_trait::async_trait;
use magique_proto::{HandshakeInfo, PlatformName, RoutingMessage, WireMessage};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Network side of a platform: accepts peers and writes to them
pub struct PlatformServer {
    name: PlatformName,
    config: Arc<PlatformConfig>,
    agenda: Agenda,
    platform: PlatformHandle,
    halted: AtomicBool,
    halt_tx: Mutex<Option<oneshot::Sender<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    listen_addr: OnceLock<SocketAddr>,
    /// Platform names already checked against the listener
    aliases: Mutex<HashMap<PlatformName, bool>>,
}

impl PlatformServer {
    /// Bind the listening socket.
    ///
    /// The returned name carries the port actually bound, so port 0 works.
    /// Without a configured host it carries the bind address, or the
    /// machine's resolved address when every interface is bound.
    pub async fn bind(config: &PlatformConfig) -> Result<(TcpListener, PlatformName)> {
        let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
        let bound = listener.local_addr()?;
        let host = match &config.host {
            Some(host) => host.clone(),
            None => announced_host(bound).await,
        };
        Ok((listener, PlatformName::new(host, bound.port())))
    }

    /// Server for the platform `name`; nothing runs until [`start`](Self::start)
    pub fn new(name: PlatformName, config: Arc<PlatformConfig>, platform: PlatformHandle) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            agenda: Agenda::new(),
            platform,
            halted: AtomicBool::new(false),
            halt_tx: Mutex::new(None),
            accept_task: Mutex::new(None),
            listen_addr: OnceLock::new(),
            aliases: Mutex::new(HashMap::new()),
        })
    }

    /// Name of the platform this server belongs to
    pub fn name(&self) -> &PlatformName {
        &self.name
    }

    /// Outbound connections by destination
    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    /// Whether [`halt`](Self::halt) has been called
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Whether `destination` names this platform, in any spelling that
    /// reaches its listener (`localhost`, a local interface, the wildcard)
    pub async fn is_own_address(&self, destination: &PlatformName) -> bool {
        if destination == &self.name {
            return true;
        }
        let Some(bound) = self.listen_addr.get().copied() else {
            return false;
        };
        if destination.port() != bound.port() {
            return false;
        }

        let known = self.aliases.lock().ok().and_then(|aliases| aliases.get(destination).copied());
        if let Some(own) = known {
            return own;
        }

        let own = reaches_listener(destination, bound).await;
        if let Ok(mut aliases) = self.aliases.lock() {
            aliases.insert(destination.clone(), own);
        }
        if own {
            debug!("{} is an alias of platform {}", destination, self.name);
        }
        own
    }

    /// Spawn the accept loop on `listener`
    pub fn start(self: &Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => {
                let _ = self.listen_addr.set(addr);
            }
            Err(e) => warn!("Cannot read the listening address: {}", e),
        }

        let (halt_tx, halt_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            Arc::downgrade(self),
            listener,
            halt_rx,
            Arc::clone(&self.config),
        ));

        if let Ok(mut slot) = self.halt_tx.lock() {
            *slot = Some(halt_tx);
        }
        if let Ok(mut slot) = self.accept_task.lock() {
            *slot = Some(task);
        }
        info!("Platform {} listening on port {}", self.name, self.name.port());
    }

    /// Open (or reuse) the outbound connection to `destination`.
    ///
    /// A connection that cannot be opened is removed from the agenda.
    pub async fn open(&self, destination: &PlatformName) -> Result<Arc<ConnectionOutbound>> {
        if self.is_halted() {
            return Err(PlatformError::PlatformStopped);
        }

        let (connection, created) = self
            .agenda
            .get_or_insert_with(destination.clone(), || {
                ConnectionOutbound::new(destination.clone(), self.name.clone(), Arc::clone(&self.config))
            })
            .await;
        if created {
            debug!("New agenda entry for {}", destination);
        }

        if let Err(e) = connection.connect(&self.agenda).await {
            self.agenda.evict(destination, connection.id()).await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Connect to `destination` without sending anything
    pub async fn connect(&self, destination: &PlatformName) -> Result<()> {
        self.open(destination).await.map(|_| ())
    }

    /// Queue `message` for `destination`, connecting first if needed.
    ///
    /// Gives up with `ConnectionFailure` after `send_attempts` attempts.
    pub async fn send_message(&self, destination: &PlatformName, message: WireMessage) -> Result<()> {
        let attempts = self.config.send_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            let delay = self.config.backoff(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            match self.try_send(destination, &message).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_connection_failure() => return Err(e),
                Err(e) => {
                    warn!("Attempt {}/{} to reach {} failed: {}", attempt + 1, attempts, destination, e);
                    last_error = Some(e);
                }
            }
        }

        error!("Giving up on {} after {} attempts", destination, attempts);
        let reason = last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string());
        Err(PlatformError::connection(destination, reason))
    }

    async fn try_send(&self, destination: &PlatformName, message: &WireMessage) -> Result<()> {
        let connection = self.open(destination).await?;
        if let Err(e) = connection.enqueue(message.clone()) {
            self.agenda.evict(destination, connection.id()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Whether a bare socket connect to `destination` succeeds
    pub async fn ping(&self, destination: &PlatformName) -> bool {
        let attempt = TcpStream::connect(destination.socket_addr());
        let result = match self.config.connect_timeout {
            Some(limit) => timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut))),
            None => attempt.await,
        };

        match result {
            Ok(_stream) => true,
            Err(e) => {
                debug!("Ping to {} failed: {}", destination, e);
                false
            }
        }
    }

    /// Close and forget the connection to `destination`.
    ///
    /// Returns whether an entry existed; close errors are only logged.
    pub async fn disconnect(&self, destination: &PlatformName) -> bool {
        let Some(connection) = self.agenda.remove(destination).await else {
            return false;
        };

        if let Err(e) = connection.close().await {
            warn!("Error while closing connection to {}: {}", destination, e);
        }
        info!("Disconnected from {}", destination);
        true
    }

    /// Close every outbound connection concurrently
    pub async fn disconnect_all(&self) -> Vec<PlatformName> {
        let connections = self.agenda.drain().await;
        let mut closing = JoinSet::new();

        for connection in connections {
            closing.spawn(async move {
                let destination = connection.destination().clone();
                if let Err(e) = connection.close().await {
                    warn!("Error while closing connection to {}: {}", destination, e);
                }
                destination
            });
        }

        let mut closed = Vec::new();
        while let Some(done) = closing.join_next().await {
            match done {
                Ok(destination) => closed.push(destination),
                Err(e) => error!("Close task failed: {}", e),
            }
        }
        closed.sort();
        closed
    }

    /// Stop accepting and tear down every inbound reader
    pub async fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);

        let halt_tx = self.halt_tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(halt_tx) = halt_tx {
            let _ = halt_tx.send(());
        }

        let task = self.accept_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Accept loop failed: {}", e);
            }
        }
    }
}

/// Frames from one peer are handled in arrival order on its reader task.
/// A message to relay onwards therefore holds up later frames from the same
/// peer until `send_message` has queued it or given up retrying.
#[async_trait]
impl InboundHandler for PlatformServer {
    async fn have_a_message(&self, message: RoutingMessage) {
        let Some(platform) = self.platform.upgrade() else {
            debug!("Platform dropped, discarding {}", message);
            return;
        };

        if let Err(e) = platform.treat_message(&message.recipient, message.content).await {
            warn!("Cannot deliver message to {}: {}", message.recipient, e);
        }
    }

    async fn have_a_info_message(&self, info: HandshakeInfo) {
        if info.recipient != self.name.to_string() {
            warn!(
                "Ignoring handshake addressed to {} (this platform is {})",
                info.recipient, self.name
            );
            return;
        }

        let sender = info.sender();
        if self.is_halted() || self.is_own_address(&sender).await {
            return;
        }

        let (_, created) = self
            .agenda
            .get_or_insert_with(sender.clone(), || {
                ConnectionOutbound::new(sender.clone(), self.name.clone(), Arc::clone(&self.config))
            })
            .await;
        if created {
            info!("Registered return path to {}", sender);
        }
    }
}

async fn accept_loop(
    server: Weak<PlatformServer>,
    listener: TcpListener,
    mut halt: oneshot::Receiver<()>,
    config: Arc<PlatformConfig>,
) {
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut halt => {
                debug!("Received halt signal");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Some(server) = server.upgrade() else {
                        break;
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Cannot disable Nagle for {}: {}", peer, e);
                    }

                    let reader = ConnectionInbound::new(stream, peer.to_string(), &config);
                    debug!("Accepted connection {} from {}", reader.id(), peer);
                    readers.spawn(async move {
                        if let Err(e) = reader.run(server.as_ref()).await {
                            warn!("Inbound connection from {} closed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    sleep(config.retry_delay).await;
                }
            },
            Some(finished) = readers.join_next(), if !readers.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Inbound reader panicked: {}", e);
                    }
                }
            }
        }
    }

    readers.shutdown().await;
    info!("Accept loop stopped");
}
