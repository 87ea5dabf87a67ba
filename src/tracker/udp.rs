use super::{Peer, RetryPolicy, TrackerConfig, TrackerRequest, TrackerResponse};
use crate::error::{BittorrentError, Result};
use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use url::Url;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
const MAX_DATAGRAM: usize = 8192;

/// Ask a UDP tracker for peers: a connect exchange followed by an announce.
pub async fn announce(
    url: &Url,
    request: &TrackerRequest,
    config: &TrackerConfig,
) -> Result<TrackerResponse> {
    let addr = resolve(url, config.default_udp_port).await?;
    info!("Announcing to UDP tracker {} ({})", url, addr);

    let tracker = UdpTracker::bind(addr, config.retry).await?;
    let connection_id = tracker.connect().await?;
    tracker.announce(connection_id, request).await
}

async fn resolve(url: &Url, default_port: u16) -> Result<SocketAddr> {
    let host = url
        .host_str()
        .ok_or_else(|| BittorrentError::UnsupportedTracker(url.to_string()))?;
    let port = url.port().unwrap_or(default_port);

    lookup_host((host, port))
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            BittorrentError::TrackerProtocol(format!("No IPv4 address for tracker {}", host))
        })
}

struct UdpTracker {
    socket: UdpSocket,
    addr: SocketAddr,
    retry: RetryPolicy,
}

impl UdpTracker {
    async fn bind(addr: SocketAddr, retry: RetryPolicy) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        Ok(Self {
            socket,
            addr,
            retry,
        })
    }

    async fn connect(&self) -> Result<u64> {
        let transaction_id: u32 = rand::thread_rng().gen();

        let mut request = BytesMut::with_capacity(16);
        request.put_u64(PROTOCOL_ID);
        request.put_u32(ACTION_CONNECT);
        request.put_u32(transaction_id);

        let response = self.send_with_retry(&request, transaction_id).await?;
        let mut body = check_header(&response, ACTION_CONNECT, transaction_id)?;
        if body.remaining() < 8 {
            return Err(BittorrentError::TrackerProtocol(format!(
                "Connect response from {} is {} bytes",
                self.addr,
                response.len()
            )));
        }

        let connection_id = body.get_u64();
        debug!("Connected to tracker {}: connection id {:x}", self.addr, connection_id);
        Ok(connection_id)
    }

    async fn announce(&self, connection_id: u64, request: &TrackerRequest) -> Result<TrackerResponse> {
        let mut rng = rand::thread_rng();
        let transaction_id: u32 = rng.gen();
        let key: u32 = rng.gen();

        let mut buf = BytesMut::with_capacity(98);
        buf.put_u64(connection_id);
        buf.put_u32(ACTION_ANNOUNCE);
        buf.put_u32(transaction_id);
        buf.put_slice(&request.info_hash);
        buf.put_slice(&request.peer_id);
        buf.put_u64(request.stats.downloaded);
        buf.put_u64(request.stats.left);
        buf.put_u64(request.stats.uploaded);
        buf.put_u32(0); // event: none
        buf.put_u32(0); // IP address: sender's
        buf.put_u32(key);
        buf.put_i32(-1); // num_want: tracker default
        buf.put_u16(request.port);

        let response = self.send_with_retry(&buf, transaction_id).await?;
        let mut body = check_header(&response, ACTION_ANNOUNCE, transaction_id)?;
        if body.remaining() < 12 {
            return Err(BittorrentError::TrackerProtocol(format!(
                "Announce response from {} is {} bytes",
                self.addr,
                response.len()
            )));
        }

        let interval = body.get_u32();
        let leechers = body.get_u32();
        let seeders = body.get_u32();
        let peers = Peer::from_compact_list(body);

        info!(
            "Tracker {} returned {} peers ({} seeders, {} leechers)",
            self.addr,
            peers.len(),
            seeders,
            leechers
        );

        Ok(TrackerResponse {
            interval: Some(interval as u64),
            complete: Some(seeders as u64),
            incomplete: Some(leechers as u64),
            peers,
        })
    }

    /// Send a datagram and wait for the reply carrying `transaction_id`,
    /// resending on silence.
    ///
    /// Attempt `n` waits `timeout * n` before the next resend. Each attempt's
    /// timer ends before the next send, so at most one wait is pending.
    /// Datagrams with another transaction id (late answers to an earlier
    /// exchange) are dropped without ending the attempt.
    async fn send_with_retry(&self, request: &[u8], transaction_id: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        for attempt in 1..=self.retry.retries {
            self.socket.send(request).await?;
            debug!("Sent {} bytes to {} (attempt {})", request.len(), self.addr, attempt);

            let deadline = Instant::now() + self.retry.backoff(attempt);
            loop {
                match timeout_at(deadline, self.socket.recv(&mut buf)).await {
                    Ok(Ok(n)) if response_tid(&buf[..n]) == Some(transaction_id) => {
                        buf.truncate(n);
                        return Ok(buf);
                    }
                    Ok(Ok(n)) => {
                        debug!("Dropping stray {}-byte datagram from {}", n, self.addr);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        warn!(
                            "No response from tracker {} (attempt {}/{})",
                            self.addr, attempt, self.retry.retries
                        );
                        break;
                    }
                }
            }
        }

        Err(BittorrentError::TrackerTimeout {
            attempts: self.retry.retries,
        })
    }
}

fn response_tid(datagram: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = datagram.get(4..8)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Validate action and transaction id, returning the rest of the datagram.
fn check_header(response: &[u8], expected_action: u32, transaction_id: u32) -> Result<&[u8]> {
    if response.len() < 8 {
        return Err(BittorrentError::TrackerProtocol(format!(
            "Tracker response is {} bytes",
            response.len()
        )));
    }

    let mut buf = response;
    let action = buf.get_u32();
    let got = buf.get_u32();

    if got != transaction_id {
        return Err(BittorrentError::TrackerProtocol(format!(
            "Transaction id mismatch: sent {:08x}, got {:08x}",
            transaction_id, got
        )));
    }

    if action == ACTION_ERROR {
        return Err(BittorrentError::TrackerProtocol(
            String::from_utf8_lossy(buf).into_owned(),
        ));
    }

    if action != expected_action {
        return Err(BittorrentError::TrackerProtocol(format!(
            "Expected action {}, got {}",
            expected_action, action
        )));
    }

    Ok(buf)
}
