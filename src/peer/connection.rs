use super::{Frame, Framer, Handshake, PeerMessage};
use crate::error::{BittorrentError, Result};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 32 * 1024;

/// A byte stream to one peer, cut into frames on the way in.
///
/// Generic over the stream so the protocol logic can run against any
/// duplex byte channel, not just TCP.
pub struct PeerConnection<S> {
    addr: SocketAddr,
    stream: S,
    framer: Framer,
    writable: bool,
}

impl PeerConnection<TcpStream> {
    /// Open a TCP connection to a peer
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BittorrentError::PeerError(format!("Timed out connecting to {}", addr)))?
            .map_err(|e| {
                BittorrentError::PeerError(format!("Failed to connect to {}: {}", addr, e))
            })?;

        Ok(Self::new(addr, stream))
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(addr: SocketAddr, stream: S) -> Self {
        Self {
            addr,
            stream,
            framer: Framer::new(),
            writable: true,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(BittorrentError::ChannelUnwritable);
        }

        match self.stream.write_all(bytes).await {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::NotConnected
                        | ErrorKind::WriteZero
                ) =>
            {
                warn!("Channel to {} is no longer writable: {}", self.addr, e);
                self.writable = false;
                Err(BittorrentError::ChannelUnwritable)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<()> {
        self.write(&handshake.to_bytes()).await?;
        debug!("Sent handshake to {}", self.addr);
        Ok(())
    }

    /// Send a message to the peer
    pub async fn send(&mut self, message: &PeerMessage) -> Result<()> {
        self.write(&message.to_bytes()).await?;
        debug!("Sent message to {}: {:?}", self.addr, message);
        Ok(())
    }

    /// Wait for the next complete frame. `None` means the peer closed the
    /// stream; a trailing partial frame is discarded.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return Ok(Some(frame));
            }

            let buffer = self.framer.buffer_mut();
            buffer.reserve(READ_CHUNK);
            if self.stream.read_buf(buffer).await? == 0 {
                if self.framer.pending() > 0 {
                    debug!(
                        "{} closed with {} unframed bytes",
                        self.addr,
                        self.framer.pending()
                    );
                }
                return Ok(None);
            }
        }
    }

    /// Shut down our side of the stream. No further writes are attempted.
    pub async fn close(&mut self) {
        if self.writable {
            self.writable = false;
            if let Err(e) = self.stream.shutdown().await {
                debug!("Error shutting down {}: {}", self.addr, e);
            }
        }
        info!("Closed connection to {}", self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    #[tokio::test]
    async fn test_frames_across_reads() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]).to_bytes();
        let have = PeerMessage::Have { piece_index: 3 }.to_bytes();
        let mut joined = handshake[60..].to_vec();
        joined.extend_from_slice(&have[..2]);

        let mock = Builder::new()
            .read(&handshake[..60])
            .read(&joined)
            .read(&have[2..])
            .build();
        let mut conn = PeerConnection::new(addr(), mock);

        assert_eq!(
            conn.next_frame().await.unwrap(),
            Some(Frame::Handshake(handshake.into()))
        );
        assert_eq!(conn.next_frame().await.unwrap(), Some(Frame::Message(have)));
        assert_eq!(conn.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_broken_pipe_marks_unwritable() {
        let mock = Builder::new()
            .write_error(std::io::Error::new(ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut conn = PeerConnection::new(addr(), mock);

        assert!(matches!(
            conn.send(&PeerMessage::Interested).await,
            Err(BittorrentError::ChannelUnwritable)
        ));
        assert!(!conn.writable);
        assert!(matches!(
            conn.send(&PeerMessage::Interested).await,
            Err(BittorrentError::ChannelUnwritable)
        ));
    }
}
