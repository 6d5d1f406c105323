//! Outbound connection: a FIFO queue drained by a single writer task

use crate::{Agenda, PlatformConfig, PlatformError, Result};
use magique_proto::{FrameCodec, HandshakeInfo, PlatformName, WireMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Item in the outbound queue
#[derive(Debug)]
enum Outgoing {
    Message(WireMessage),
    /// Everything queued before this marker is written, then the socket closes
    Close,
}

/// Cached connection to one remote platform.
///
/// Messages can be queued before the socket exists; they are written in
/// queue order once [`connect`](Self::connect) succeeds, right after the
/// handshake.
pub struct ConnectionOutbound {
    /// Identity of this connection object, used to evict exactly this entry
    id: Uuid,
    /// Platform this connection writes to
    destination: PlatformName,
    /// Name announced in the handshake
    local: PlatformName,
    config: Arc<PlatformConfig>,
    queue_tx: mpsc::UnboundedSender<Outgoing>,
    /// Handed to the writer on connect; the lock also serializes connects
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    writer: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ConnectionOutbound {
    /// Create a connection object; no socket is opened yet
    pub fn new(destination: PlatformName, local: PlatformName, config: Arc<PlatformConfig>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            id: Uuid::new_v4(),
            destination,
            local,
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            connected: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            writer: Mutex::new(None),
        })
    }

    /// Identity of this connection object
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Platform this connection writes to
    pub fn destination(&self) -> &PlatformName {
        &self.destination
    }

    /// Whether the writer is running on an open socket
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Open the socket and start the writer. No-op when already connected.
    ///
    /// A writer that later fails removes this entry from `agenda`.
    pub async fn connect(&self, agenda: &Agenda) -> Result<()> {
        let mut queue = self.queue_rx.lock().await;

        if self.is_connected() {
            return Ok(());
        }
        if self.is_closed() || queue.is_none() {
            return Err(PlatformError::connection(&self.destination, "connection already closed"));
        }

        let stream = self.open_stream().await?;
        let Some(rx) = queue.take() else {
            return Err(PlatformError::connection(&self.destination, "connection already closed"));
        };

        self.start_writer(stream, rx, agenda).await;
        info!(peer = %self.destination, connection = %self.id, "Connected to platform");
        Ok(())
    }

    async fn start_writer<W>(&self, sink: W, rx: mpsc::UnboundedReceiver<Outgoing>, agenda: &Agenda)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = OutboundWriter::new(&self.destination, &self.local, &self.config);
        let connected = Arc::clone(&self.connected);
        let agenda = agenda.clone();
        let id = self.id;

        connected.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let destination = writer.destination.clone();
            let result = writer.run(sink, rx).await;
            connected.store(false, Ordering::SeqCst);

            match &result {
                Ok(()) => debug!(peer = %destination, connection = %id, "Outbound connection closed"),
                Err(e) => {
                    error!(peer = %destination, connection = %id, "Outbound connection failed: {}", e);
                    agenda.evict(&destination, id).await;
                }
            }
            result
        });
        *self.writer.lock().await = Some(handle);
    }

    /// Queue a message for the writer
    pub fn enqueue(&self, message: WireMessage) -> Result<()> {
        if self.is_closed() {
            return Err(PlatformError::connection(&self.destination, "connection closed"));
        }

        self.queue_tx
            .send(Outgoing::Message(message))
            .map_err(|_| PlatformError::connection(&self.destination, "writer stopped"))
    }

    /// Drain the queue, then close the socket.
    ///
    /// A writer still busy after `close_timeout` is aborted.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.queue_tx.send(Outgoing::Close);

        // Never connected: drop whatever was queued. A connect in flight
        // holds the lock and will observe `closed` afterwards.
        if let Ok(mut queue) = self.queue_rx.try_lock() {
            queue.take();
        }

        let Some(mut handle) = self.writer.lock().await.take() else {
            return Ok(());
        };

        let limit = self.config.close_timeout;
        match timeout(limit, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PlatformError::connection(&self.destination, join_error)),
            Err(_) => {
                handle.abort();
                self.connected.store(false, Ordering::SeqCst);
                Err(PlatformError::Timeout { duration: limit })
            }
        }
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        let connecting = TcpStream::connect(self.destination.socket_addr());
        let stream = match self.config.connect_timeout {
            Some(limit) => timeout(limit, connecting)
                .await
                .map_err(|_| PlatformError::Timeout { duration: limit })?,
            None => connecting.await,
        }
        .map_err(|e| PlatformError::connection(&self.destination, e))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %self.destination, "Cannot disable Nagle: {}", e);
        }
        Ok(stream)
    }
}

/// Writer task state: handshake first, then the queue in order
struct OutboundWriter {
    destination: PlatformName,
    handshake: HandshakeInfo,
    codec: FrameCodec,
    write_timeout: Option<Duration>,
    sequence: u32,
}

impl OutboundWriter {
    fn new(destination: &PlatformName, local: &PlatformName, config: &PlatformConfig) -> Self {
        Self {
            destination: destination.clone(),
            handshake: HandshakeInfo::new(destination, local),
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
            write_timeout: config.write_timeout,
            sequence: 0,
        }
    }

    async fn run<W>(mut self, mut sink: W, mut queue: mpsc::UnboundedReceiver<Outgoing>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let handshake = WireMessage::Handshake(self.handshake.clone());
        self.write(&mut sink, &handshake).await?;

        while let Some(outgoing) = queue.recv().await {
            match outgoing {
                Outgoing::Message(message) => self.write(&mut sink, &message).await?,
                Outgoing::Close => break,
            }
        }

        sink.shutdown().await?;
        Ok(())
    }

    async fn write<W>(&mut self, sink: &mut W, message: &WireMessage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = match message
            .to_frame(self.sequence)
            .and_then(|frame| self.codec.encode_frame(&frame))
        {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(peer = %self.destination, "Dropping message that cannot be encoded: {}", e);
                return Ok(());
            }
        };

        let writing = async {
            sink.write_all(&encoded).await?;
            sink.flush().await
        };
        let written = match self.write_timeout {
            Some(limit) => timeout(limit, writing)
                .await
                .map_err(|_| PlatformError::Timeout { duration: limit })?,
            None => writing.await,
        };
        written.map_err(|e| PlatformError::connection(&self.destination, e))?;

        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }
}
