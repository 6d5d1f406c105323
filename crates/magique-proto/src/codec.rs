//! Length-prefixed framing between platforms
//!
//! Each frame on a platform connection is a big-endian `u32` byte count
//! followed by that many bytes of MessagePack-encoded [`Frame`].

use crate::{Frame, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body accepted by default (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const INITIAL_CAPACITY: usize = 8 * 1024;

/// Splits a byte stream into frames and back
#[derive(Debug)]
pub struct FrameCodec {
    pending: BytesMut,
    limit: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec bounded by [`MAX_FRAME_SIZE`]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Codec bounded by `limit` body bytes in both directions.
    ///
    /// The limit is capped at `u32::MAX`, the largest length the prefix holds.
    pub fn with_max_frame_size(limit: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(INITIAL_CAPACITY),
            limit: limit.min(u32::MAX as usize),
        }
    }

    fn check_len(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.limit {
            Err(ProtocolError::FrameTooLarge { size: len, max: self.limit })
        } else {
            Ok(())
        }
    }

    /// Serialize `frame` together with its length prefix
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let body = frame.to_msgpack()?;
        self.check_len(body.len())?;

        let mut out = BytesMut::with_capacity(LEN_PREFIX + body.len());
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }

    /// Encode `frame`, write it out and flush
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode_frame(frame)?).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Next frame from `reader`, or `None` once the peer closes between frames.
    ///
    /// End of stream in the middle of a frame is a [`ProtocolError::TruncatedFrame`].
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Frame>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        while self.pending.len() < LEN_PREFIX || !self.has_complete_frame()? {
            if reader.read_buf(&mut self.pending).await? == 0 {
                return match self.pending.len() {
                    0 => Ok(None),
                    buffered => Err(ProtocolError::TruncatedFrame { buffered }),
                };
            }
        }
        self.try_decode_frame()
    }

    fn has_complete_frame(&mut self) -> Result<bool, ProtocolError> {
        let body_len = self.peek_len();
        self.check_len(body_len)?;

        let needed = LEN_PREFIX + body_len;
        if self.pending.len() >= needed {
            return Ok(true);
        }
        self.pending.reserve(needed - self.pending.len());
        Ok(false)
    }

    fn peek_len(&self) -> usize {
        let mut prefix = &self.pending[..LEN_PREFIX];
        prefix.get_u32() as usize
    }

    /// Decode one frame if the buffer already holds all of it
    pub fn try_decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.pending.len() < LEN_PREFIX || !self.has_complete_frame()? {
            return Ok(None);
        }

        let body_len = self.peek_len();
        self.pending.advance(LEN_PREFIX);
        let body = self.pending.split_to(body_len);
        Frame::from_msgpack(&body).map(Some)
    }

    /// Bytes received but not yet decoded
    pub fn buffer_size(&self) -> usize {
        self.pending.len()
    }
}
