use super::{Frame, Handshake, PeerConnection, PeerMessage, SessionState};
use crate::error::{BittorrentError, Result};
use crate::piece::{bitfield_pieces, PieceBlock, RequestQueue, TransferState};
use crate::storage::Storage;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Block counts published after every received block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub received: usize,
    pub total: usize,
    pub done: bool,
}

/// State shared by every peer connection of one download.
pub struct DownloadContext {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub state: Mutex<TransferState>,
    pub storage: Storage,
    pub progress: watch::Sender<Progress>,
}

impl DownloadContext {
    pub fn new(
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        state: TransferState,
        storage: Storage,
    ) -> Self {
        let (received, total) = state.store.progress();
        let (progress, _) = watch::channel(Progress {
            received,
            total,
            done: state.store.is_done(),
        });

        Self {
            info_hash,
            peer_id,
            state: Mutex::new(state),
            storage,
            progress,
        }
    }
}

/// Drives one outbound connection: handshake, then a request loop fed by
/// the peer's have/bitfield announcements.
pub struct DownloadSession<'a, S> {
    conn: PeerConnection<S>,
    ctx: &'a DownloadContext,
    queue: RequestQueue,
    state: SessionState,
}

impl<'a, S> DownloadSession<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: PeerConnection<S>, ctx: &'a DownloadContext) -> Self {
        Self {
            conn,
            ctx,
            queue: RequestQueue::new(),
            state: SessionState::AwaitingHandshake,
        }
    }

    /// Run until the peer chokes us, the stream ends, or the download is done.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.state = SessionState::Closed;
        self.conn.close().await;
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let handshake = Handshake::new(self.ctx.info_hash, self.ctx.peer_id);
        self.conn.send_handshake(&handshake).await?;

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
                "Info hash mismatch from {}",
                self.conn.addr()
            )));
        }

        debug!("Handshake complete with {}", self.conn.addr());
        self.state = SessionState::Active;
        self.send_or_skip(&PeerMessage::Interested).await
    }

    async fn on_message(&mut self, message: PeerMessage) -> Result<()> {
        match message {
            PeerMessage::Choke => {
                info!("Choked by {}, dropping connection", self.conn.addr());
                self.state = SessionState::Closed;
                Ok(())
            }
            PeerMessage::Unchoke => {
                debug!("Unchoked by {}", self.conn.addr());
                self.queue.unchoke();
                self.request_next().await
            }
            PeerMessage::Have { piece_index } => self.on_have(piece_index).await,
            PeerMessage::Bitfield { bitfield } => self.on_bitfield(bitfield).await,
            PeerMessage::Piece {
                index,
                begin,
                block,
            } => self.on_piece(index, begin, block).await,
            other => {
                debug!("Ignoring {:?} from {}", other, self.conn.addr());
                Ok(())
            }
        }
    }

    async fn on_have(&mut self, piece_index: u32) -> Result<()> {
        let was_empty = self.queue.is_empty();
        {
            let mut state = self.ctx.state.lock().await;
            state.availability.increment(piece_index);
            if (piece_index as usize) < state.availability.len() {
                self.queue.enqueue(piece_index);
            }
        }

        if was_empty {
            self.request_next().await?;
        }
        Ok(())
    }

    async fn on_bitfield(&mut self, bitfield: Bytes) -> Result<()> {
        let was_empty = self.queue.is_empty();
        {
            let mut state = self.ctx.state.lock().await;
            state.availability.add_bitfield(&bitfield);
            let piece_count = state.availability.len();
            for piece_index in bitfield_pieces(&bitfield) {
                if (piece_index as usize) < piece_count {
                    self.queue.enqueue(piece_index);
                }
            }
        }

        debug!(
            "{} announced {} pieces",
            self.conn.addr(),
            self.queue.len()
        );

        if was_empty {
            self.request_next().await?;
        }
        Ok(())
    }

    async fn on_piece(&mut self, index: u32, begin: u32, block: Bytes) -> Result<()> {
        let piece_block = PieceBlock::new(index, begin, block.len() as u32);
        if !self.ctx.state.lock().await.store.is_block(&piece_block) {
            warn!(
                "{} sent a misaligned or partial block of piece {} (begin {}, {} bytes), ignoring",
                self.conn.addr(),
                index,
                begin,
                block.len()
            );
            return Ok(());
        }

        // Written before it is marked received, so completion implies
        // every block is already on disk.
        match self.ctx.storage.write_block(index, begin, &block).await {
            Err(BittorrentError::StorageClosed) => {
                debug!("Late block from {} after completion", self.conn.addr());
                self.state = SessionState::Closed;
                return Ok(());
            }
            other => other?,
        }

        let progress = {
            let mut state = self.ctx.state.lock().await;
            state.store.add_received(&piece_block);
            let (received, total) = state.store.progress();
            Progress {
                received,
                total,
                done: state.store.is_done(),
            }
        };
        self.ctx.progress.send_replace(progress);

        info!(
            "Progress: {:.2}% ({}/{} blocks)",
            progress.received as f64 * 100.0 / progress.total.max(1) as f64,
            progress.received,
            progress.total
        );

        if progress.done {
            info!("Download complete");
            self.state = SessionState::Closed;
            self.ctx.storage.finalize().await
        } else {
            self.request_next().await
        }
    }

    /// Ask this peer for one more block, rarest piece first.
    async fn request_next(&mut self) -> Result<()> {
        let block = {
            let mut state = self.ctx.state.lock().await;
            state.next_request(&mut self.queue)
        };

        let Some(block) = block else {
            return Ok(());
        };

        match self.conn.send(&PeerMessage::Request { block }).await {
            Err(BittorrentError::ChannelUnwritable) => {
                warn!(
                    "Channel to {} not writable, skipping request for piece {}",
                    self.conn.addr(),
                    block.index
                );
                self.ctx.state.lock().await.store.release(&block);
                Ok(())
            }
            other => other,
        }
    }

    async fn send_or_skip(&mut self, message: &PeerMessage) -> Result<()> {
        match self.conn.send(message).await {
            Err(BittorrentError::ChannelUnwritable) => {
                warn!(
                    "Channel to {} not writable, skipping {:?}",
                    self.conn.addr(),
                    message
                );
                Ok(())
            }
            other => other,
        }
    }
}
