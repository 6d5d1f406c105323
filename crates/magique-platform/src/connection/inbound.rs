//! Inbound connection: reads frames from a socket a peer dialed

use crate::{PlatformConfig, PlatformError, Result};
use async_trait::async_trait;
use magique_proto::{Frame, FrameCodec, HandshakeInfo, ProtocolError, RoutingMessage, WireMessage};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Receives what inbound connections decode
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Routing message read from the stream
    async fn have_a_message(&self, message: RoutingMessage);

    /// Handshake read from the stream
    async fn have_a_info_message(&self, info: HandshakeInfo);
}

/// Reader for one accepted stream.
///
/// Frames are dispatched one at a time, in stream order.
pub struct ConnectionInbound<S> {
    id: Uuid,
    peer: String,
    stream: S,
    codec: FrameCodec,
    read_timeout: Option<Duration>,
    expected_sequence: u32,
}

impl<S> ConnectionInbound<S>
where
    S: AsyncRead + Unpin + Send,
{
    /// Wrap an accepted stream
    pub fn new(stream: S, peer: impl Into<String>, config: &PlatformConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            stream,
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
            read_timeout: config.read_timeout,
            expected_sequence: 0,
        }
    }

    /// Identity of this reader
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address of the stream
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read and dispatch frames until the peer closes or goes idle.
    ///
    /// Returns the number of frames read. Unreadable content ends the loop
    /// with an error; the stream is dropped either way.
    pub async fn run<H>(mut self, handler: &H) -> Result<u64>
    where
        H: InboundHandler + ?Sized,
    {
        let mut frames = 0u64;

        while let Some(frame) = self.next_frame().await? {
            frames += 1;
            self.check_sequence(&frame);

            match WireMessage::from_frame(&frame) {
                Ok(Some(WireMessage::Routing(message))) => {
                    trace!(peer = %self.peer, "Received {}", message);
                    handler.have_a_message(message).await;
                }
                Ok(Some(WireMessage::Handshake(info))) => {
                    debug!(peer = %self.peer, sender = %info.sender(), "Received handshake");
                    handler.have_a_info_message(info).await;
                }
                Ok(None) => {
                    warn!(peer = %self.peer, kind = frame.kind.0, "Dropping frame of unknown kind");
                }
                Err(e) => return Err(PlatformError::Deserialization(e.to_string())),
            }
        }

        debug!(peer = %self.peer, connection = %self.id, frames, "Inbound connection finished");
        Ok(frames)
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let reading = self.codec.read_frame(&mut self.stream);
        let read = match self.read_timeout {
            Some(limit) => match timeout(limit, reading).await {
                Ok(read) => read,
                Err(_) => {
                    debug!(peer = %self.peer, "Inbound connection idle for {:?}, closing", limit);
                    return Ok(None);
                }
            },
            None => reading.await,
        };

        read.map_err(|e| match e {
            ProtocolError::Serialization(reason) => PlatformError::Deserialization(reason),
            other => PlatformError::Protocol(other),
        })
    }

    fn check_sequence(&mut self, frame: &Frame) {
        if frame.sequence != self.expected_sequence {
            warn!(
                peer = %self.peer,
                expected = self.expected_sequence,
                received = frame.sequence,
                "Frame sequence gap"
            );
        }
        self.expected_sequence = frame.sequence.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use magique_proto::{FrameKind, PlatformName};
    use std::sync::Mutex;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<RoutingMessage>>,
        infos: Mutex<Vec<HandshakeInfo>>,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn have_a_message(&self, message: RoutingMessage) {
            self.messages.lock().unwrap().push(message);
        }

        async fn have_a_info_message(&self, info: HandshakeInfo) {
            self.infos.lock().unwrap().push(info);
        }
    }

    fn reader(stream: DuplexStream, config: &PlatformConfig) -> ConnectionInbound<DuplexStream> {
        ConnectionInbound::new(stream, "test-peer", config)
    }

    async fn write(stream: &mut DuplexStream, message: WireMessage, sequence: u32) {
        let frame = message.to_frame(sequence).unwrap();
        FrameCodec::new().write_frame(stream, &frame).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_in_stream_order() {
        let (mut client, server) = tokio::io::duplex(8192);
        let handshake = HandshakeInfo::new(&PlatformName::new("b", 2), &PlatformName::new("a", 1));

        write(&mut client, WireMessage::Handshake(handshake.clone()), 0).await;
        for n in 1..=3u8 {
            let message = RoutingMessage::new("x@b:2", Bytes::from(vec![n]));
            write(&mut client, WireMessage::Routing(message), n as u32).await;
        }
        drop(client);

        let recorder = Recorder::default();
        let frames = reader(server, &PlatformConfig::default()).run(&recorder).await.unwrap();

        assert_eq!(frames, 4);
        assert_eq!(*recorder.infos.lock().unwrap(), vec![handshake]);
        let contents: Vec<u8> = recorder
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.content[0])
            .collect();
        assert_eq!(contents, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_skipped() {
        let (mut client, server) = tokio::io::duplex(8192);
        let codec = FrameCodec::new();
        codec
            .write_frame(&mut client, &Frame::new(FrameKind(99), 0, Bytes::from_static(b"??")))
            .await
            .unwrap();
        write(&mut client, WireMessage::Routing(RoutingMessage::new("x@b:2", Bytes::new())), 1).await;
        drop(client);

        let recorder = Recorder::default();
        let frames = reader(server, &PlatformConfig::default()).run(&recorder).await.unwrap();

        assert_eq!(frames, 2);
        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_payload_is_a_deserialization_error() {
        let (mut client, server) = tokio::io::duplex(8192);
        let codec = FrameCodec::new();
        codec
            .write_frame(&mut client, &Frame::new(FrameKind::ROUTING, 0, Bytes::from_static(&[0xc1])))
            .await
            .unwrap();
        drop(client);

        let recorder = Recorder::default();
        let result = reader(server, &PlatformConfig::default()).run(&recorder).await;

        assert!(matches!(result, Err(PlatformError::Deserialization(_))));
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (mut client, server) = tokio::io::duplex(8192);
        client.write_all(&[0, 0, 0, 50, 1, 2, 3]).await.unwrap();
        drop(client);

        let result = reader(server, &PlatformConfig::default()).run(&Recorder::default()).await;
        assert!(matches!(
            result,
            Err(PlatformError::Protocol(ProtocolError::TruncatedFrame { .. }))
        ));
    }

    #[tokio::test]
    async fn test_idle_stream_times_out() {
        let (_client, server) = tokio::io::duplex(8192);
        let config = PlatformConfig::default().with_read_timeout(Duration::from_millis(50));

        let frames = reader(server, &config).run(&Recorder::default()).await.unwrap();
        assert_eq!(frames, 0);
    }

    #[tokio::test]
    async fn test_sequence_gap_is_tolerated() {
        let (mut client, server) = tokio::io::duplex(8192);
        write(&mut client, WireMessage::Routing(RoutingMessage::new("x@b:2", Bytes::new())), 0).await;
        write(&mut client, WireMessage::Routing(RoutingMessage::new("x@b:2", Bytes::new())), 5).await;
        drop(client);

        let recorder = Recorder::default();
        reader(server, &PlatformConfig::default()).run(&recorder).await.unwrap();
        assert_eq!(recorder.messages.lock().unwrap().len(), 2);
    }
}
