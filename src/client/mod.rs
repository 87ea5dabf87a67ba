use crate::error::{BittorrentError, Result};
use crate::peer::{
    DownloadContext, DownloadSession, PeerConnection, Progress, SeedContext, UploadSession,
};
use crate::piece::{PieceStore, TransferState};
use crate::storage::Storage;
use crate::torrent::Metainfo;
use crate::tracker::{
    generate_peer_id, Peer, TrackerClient, TrackerConfig, TrackerRequest, TransferStats,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub listen_port: u16,
    pub max_peers: usize,
    /// Limit on each outbound TCP connect
    pub connect_timeout: Duration,
    /// A download with no new block for this long is abandoned
    pub stall_timeout: Duration,
    pub tracker: TrackerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            max_peers: 50,
            connect_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(120),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Main BitTorrent client
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
    tracker: TrackerClient,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        let tracker = TrackerClient::new(config.tracker.clone())?;
        Ok(Self {
            config,
            peer_id,
            tracker,
        })
    }

    /// Try every announce URL in order until one yields peers.
    pub async fn find_peers(&self, metainfo: &Metainfo, stats: TransferStats) -> Result<Vec<Peer>> {
        let request = TrackerRequest::new(
            metainfo.info_hash,
            self.peer_id,
            self.config.listen_port,
            stats,
        );

        for url in metainfo.announce_urls() {
            match self.tracker.announce(&url, &request).await {
                Ok(response) if !response.peers.is_empty() => {
                    info!(
                        "Received {} peers from {} (seeders: {:?}, leechers: {:?}, interval: {:?}s)",
                        response.peers.len(),
                        url,
                        response.complete,
                        response.incomplete,
                        response.interval
                    );
                    return Ok(response.peers);
                }
                Ok(_) => warn!("Tracker {} returned no peers", url),
                Err(e) => warn!("Tracker {} failed: {}", url, e),
            }
        }

        Err(BittorrentError::NoPeers)
    }

    /// Download a torrent into `output`
    pub async fn download(&self, metainfo: &Metainfo, output: &Path) -> Result<()> {
        info!("Starting download for: {}", metainfo.info.name);

        let peers = self
            .find_peers(metainfo, TransferStats::fresh(metainfo.info.total_length))
            .await?;
        let addrs = peers.into_iter().map(|p| p.addr).collect();

        self.download_from(metainfo, output, addrs).await
    }

    /// Download from a known set of peers, one task per peer.
    ///
    /// Returns once every block has been written and the file is closed, or
    /// with `Stalled` when no peer is left or no block arrived in time.
    pub async fn download_from(
        &self,
        metainfo: &Metainfo,
        output: &Path,
        peers: Vec<SocketAddr>,
    ) -> Result<()> {
        if peers.is_empty() {
            return Err(BittorrentError::NoPeers);
        }

        let storage = Storage::create(output, &metainfo.info).await?;
        let ctx = Arc::new(DownloadContext::new(
            metainfo.info_hash,
            self.peer_id,
            TransferState::new(&metainfo.info),
            storage,
        ));
        let mut progress = ctx.progress.subscribe();

        let mut tasks = JoinSet::new();
        for addr in peers.into_iter().take(self.config.max_peers) {
            let ctx = Arc::clone(&ctx);
            let connect_timeout = self.config.connect_timeout;
            tasks.spawn(async move {
                let result = match PeerConnection::connect(addr, connect_timeout).await {
                    Ok(conn) => DownloadSession::new(conn, &ctx).run().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("Peer {} disconnected: {}", addr, e);
                }
            });
        }
        info!("Started {} peer connections", tasks.len());

        let outcome = self.await_completion(&mut tasks, &mut progress).await;
        tasks.shutdown().await;
        ctx.storage.finalize().await?;

        if outcome.is_ok() {
            info!("Download complete: {}", output.display());
        }
        outcome
    }

    async fn await_completion(
        &self,
        tasks: &mut JoinSet<()>,
        progress: &mut watch::Receiver<Progress>,
    ) -> Result<()> {
        let stall_timeout = self.config.stall_timeout;
        let mut deadline = Instant::now() + stall_timeout;

        loop {
            if progress.borrow_and_update().done {
                return Ok(());
            }

            tokio::select! {
                biased;

                changed = progress.changed() => {
                    if changed.is_err() {
                        return Err(BittorrentError::Stalled("progress channel closed".to_string()));
                    }
                    deadline = Instant::now() + stall_timeout;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => error!("Peer task failed: {}", e),
                    None => {
                        if progress.borrow().done {
                            return Ok(());
                        }
                        return Err(BittorrentError::Stalled(
                            "every peer connection has closed".to_string(),
                        ));
                    }
                },
                _ = sleep_until(deadline) => {
                    return Err(BittorrentError::Stalled(format!(
                        "no block received in {:?}",
                        stall_timeout
                    )));
                }
            }
        }
    }

    /// Serve an already complete file to inbound peers
    pub async fn seed(&self, metainfo: &Metainfo, file: &Path) -> Result<()> {
        let storage = Storage::open(file, &metainfo.info).await?;
        let mut store = PieceStore::new(&metainfo.info);
        store.mark_all_received();
        let ctx = Arc::new(SeedContext::new(
            metainfo.info_hash,
            self.peer_id,
            store,
            storage,
        ));

        let listener = TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        info!(
            "Seeding {} on {}",
            metainfo.info.name,
            listener.local_addr()?
        );

        // Let the tracker know we are here; seeding goes on either way.
        if let Err(e) = self.find_peers(metainfo, TransferStats::fresh(0)).await {
            warn!("Seed announce failed: {}", e);
        }

        serve(listener, ctx).await
    }
}

/// Accept inbound connections forever, one upload task each.
pub async fn serve(listener: TcpListener, ctx: Arc<SeedContext>) -> Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        info!("Peer connected for seeding: {}", addr);

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let conn = PeerConnection::new(addr, stream);
            if let Err(e) = UploadSession::new(conn, &ctx).run().await {
                warn!("Seeding to {} ended: {}", addr, e);
            }
            info!("Uploaded {} bytes in total", ctx.uploaded());
        });
    }
}
