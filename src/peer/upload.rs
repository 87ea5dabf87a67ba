use super::{Frame, Handshake, PeerConnection, PeerMessage, SessionState};
use crate::error::{BittorrentError, Result};
use crate::piece::{PieceBlock, PieceStore, BLOCK_LEN};
use crate::storage::Storage;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// What every inbound connection of a seeding torrent reads from.
pub struct SeedContext {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub store: PieceStore,
    pub storage: Storage,
    uploaded: AtomicU64,
}

impl SeedContext {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], store: PieceStore, storage: Storage) -> Self {
        Self {
            info_hash,
            peer_id,
            store,
            storage,
            uploaded: AtomicU64::new(0),
        }
    }

    /// Bytes served across all connections
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }
}

/// Serves blocks to one inbound peer.
pub struct UploadSession<'a, S> {
    conn: PeerConnection<S>,
    ctx: &'a SeedContext,
    state: SessionState,
    am_choking: bool,
}

impl<'a, S> UploadSession<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: PeerConnection<S>, ctx: &'a SeedContext) -> Self {
        Self {
            conn,
            ctx,
            state: SessionState::AwaitingHandshake,
            am_choking: true,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.state = SessionState::Closed;
        self.conn.close().await;
        result
    }

    async fn drive(&mut self) -> Result<()> {
        while let Some(frame) = self.conn.next_frame().await? {
            match frame {
                Frame::Handshake(bytes) => self.on_handshake(&bytes).await?,
                Frame::Message(bytes) => match PeerMessage::from_frame(bytes) {
                    Ok(message) => self.on_message(message).await?,
                    Err(BittorrentError::UnknownMessageId(id)) => {
                        debug!("Ignoring message id {} from {}", id, self.conn.addr());
                    }
                    Err(e) => return Err(e),
                },
            }

            if self.state == SessionState::Closed {
                break;
            }
        }
        Ok(())
    }

    async fn on_handshake(&mut self, bytes: &[u8]) -> Result<()> {
        let handshake = Handshake::from_bytes(bytes)?;
        if handshake.info_hash != self.ctx.info_hash {
            return Err(BittorrentError::PeerError(format!(
                "{} asked for unknown info hash {}",
                self.conn.addr(),
                hex::encode(handshake.info_hash)
            )));
        }

        info!("Handshake successful with {}", self.conn.addr());
        self.state = SessionState::Active;
        self.conn
            .send_handshake(&Handshake::new(self.ctx.info_hash, self.ctx.peer_id))
            .await?;
        self.conn
            .send(&PeerMessage::Bitfield {
                bitfield: Bytes::from(self.ctx.store.bitfield()),
            })
            .await
    }

    async fn on_message(&mut self, message: PeerMessage) -> Result<()> {
        match message {
            PeerMessage::Interested => {
                debug!("{} is interested", self.conn.addr());
                if self.am_choking {
                    self.am_choking = false;
                    self.conn.send(&PeerMessage::Unchoke).await?;
                }
                Ok(())
            }
            PeerMessage::NotInterested => {
                debug!("{} is not interested", self.conn.addr());
                Ok(())
            }
            PeerMessage::Request { block } => self.on_request(block).await,
            other => {
                debug!("Ignoring {:?} from {}", other, self.conn.addr());
                Ok(())
            }
        }
    }

    async fn on_request(&mut self, block: PieceBlock) -> Result<()> {
        if block.length > BLOCK_LEN {
            warn!(
                "{} requested oversized block ({} bytes), dropping",
                self.conn.addr(),
                block.length
            );
            self.state = SessionState::Closed;
            return Ok(());
        }

        if self.am_choking {
            debug!("Ignoring request from choked peer {}", self.conn.addr());
            return Ok(());
        }

        if !self.ctx.store.contains(&block) || !self.ctx.store.has_piece(block.index) {
            debug!("{} requested unavailable block {:?}", self.conn.addr(), block);
            return Ok(());
        }

        let data = self
            .ctx
            .storage
            .read_block(block.index, block.begin, block.length)
            .await?;
        let len = data.len() as u64;

        match self
            .conn
            .send(&PeerMessage::Piece {
                index: block.index,
                begin: block.begin,
                block: Bytes::from(data),
            })
            .await
        {
            Ok(()) => {
                let total = self.ctx.uploaded.fetch_add(len, Ordering::Relaxed) + len;
                debug!(
                    "Sent piece {} @ {} to {} ({} bytes uploaded)",
                    block.index,
                    block.begin,
                    self.conn.addr(),
                    total
                );
                Ok(())
            }
            Err(BittorrentError::ChannelUnwritable) => {
                warn!("Channel to {} not writable, skipping block", self.conn.addr());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
