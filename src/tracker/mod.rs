mod http;
mod peer;
mod request;
mod response;
mod udp;

pub use peer::Peer;
pub use request::{TrackerRequest, TransferStats};
pub use response::TrackerResponse;

use crate::error::{BittorrentError, Result};
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// How often a UDP datagram is sent before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Base wait; attempt `n` waits `timeout * n` for a reply
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.timeout * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    /// Used when a `udp://` URL has no port
    pub default_udp_port: u16,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(30),
            default_udp_port: 6969,
        }
    }
}

/// Client for communicating with BitTorrent trackers
pub struct TrackerClient {
    config: TrackerConfig,
    http: Client,
}

impl TrackerClient {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self { config, http })
    }

    /// Announce to one tracker, picking the transport from the URL scheme.
    pub async fn announce(&self, tracker_url: &str, request: &TrackerRequest) -> Result<TrackerResponse> {
        let url = Url::parse(tracker_url)?;
        match url.scheme() {
            "udp" => udp::announce(&url, request, &self.config).await,
            "http" | "https" => http::announce(&self.http, &url, request).await,
            _ => Err(BittorrentError::UnsupportedTracker(tracker_url.to_string())),
        }
    }
}

/// Generate a random peer ID
/// Format: -LC0001-<12 random bytes>
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(b"-LC0001-");
    rand::thread_rng().fill(&mut peer_id[8..]);
    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        let peer_id = generate_peer_id();
        assert_eq!(&peer_id[0..8], b"-LC0001-");
        assert_ne!(generate_peer_id(), peer_id);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let client = TrackerClient::new(TrackerConfig::default()).unwrap();
        let request = TrackerRequest::new([0u8; 20], generate_peer_id(), 6881, TransferStats::fresh(1));

        assert!(matches!(
            client.announce("wss://tracker.example/announce", &request).await,
            Err(BittorrentError::UnsupportedTracker(_))
        ));
        assert!(matches!(
            client.announce("not a url", &request).await,
            Err(BittorrentError::UrlParseError(_))
        ));
    }
}
