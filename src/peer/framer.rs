use crate::error::{BittorrentError, Result};
use bytes::{Buf, Bytes, BytesMut};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// One complete unit cut out of the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The connection's first frame: `49 + pstrlen` bytes
    Handshake(Bytes),
    /// A length-prefixed message, prefix included
    Message(Bytes),
}

/// Buffers inbound chunks and cuts them into frames. The first frame is
/// always taken to be the handshake; everything after it is length-prefixed.
#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,
    handshake_pending: bool,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            handshake_pending: true,
        }
    }

    /// Direct access for readers that fill the buffer in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn frame_len(&self) -> Result<Option<usize>> {
        if self.handshake_pending {
            return Ok(self.buffer.first().map(|&pstrlen| 49 + pstrlen as usize));
        }

        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let length = (&self.buffer[..4]).get_u32() as usize;
        if length > MAX_FRAME_LEN {
            return Err(BittorrentError::MalformedMessage(format!(
                "frame of {} bytes exceeds limit",
                length
            )));
        }
        Ok(Some(4 + length))
    }

    /// Cut the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let len = match self.frame_len()? {
            Some(len) if self.buffer.len() >= len => len,
            _ => return Ok(None),
        };

        let bytes = self.buffer.split_to(len).freeze();
        if self.handshake_pending {
            self.handshake_pending = false;
            Ok(Some(Frame::Handshake(bytes)))
        } else {
            Ok(Some(Frame::Message(bytes)))
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
