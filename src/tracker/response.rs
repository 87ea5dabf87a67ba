use super::Peer;
use crate::bencode::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::net::IpAddr;

/// Response from a tracker
#[derive(Debug, Clone, Default)]
pub struct TrackerResponse {
    /// Seconds to wait before the next announce
    pub interval: Option<u64>,
    /// Number of seeders
    pub complete: Option<u64>,
    /// Number of leechers
    pub incomplete: Option<u64>,
    pub peers: Vec<Peer>,
}

impl TrackerResponse {
    /// Interpret a bencoded HTTP tracker body
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(BittorrentError::TrackerProtocol(
                "Response must be a dict".to_string(),
            ));
        }

        if let Some(failure) = value.get(b"failure reason") {
            let reason = failure.as_str().unwrap_or("Unknown failure").to_string();
            return Err(BittorrentError::TrackerProtocol(reason));
        }

        let peers = match value.get(b"peers") {
            Some(BencodeValue::Bytes(compact)) => Peer::from_compact_list(compact),
            Some(BencodeValue::List(list)) => parse_peer_list(list)?,
            Some(_) => {
                return Err(BittorrentError::TrackerProtocol(
                    "Invalid 'peers' format".to_string(),
                ))
            }
            None => {
                return Err(BittorrentError::TrackerProtocol(
                    "Missing 'peers' field".to_string(),
                ))
            }
        };

        Ok(TrackerResponse {
            interval: value.get_u64(b"interval"),
            complete: value.get_u64(b"complete"),
            incomplete: value.get_u64(b"incomplete"),
            peers,
        })
    }
}

fn parse_peer_list(list: &[BencodeValue]) -> Result<Vec<Peer>> {
    let mut peers = Vec::with_capacity(list.len());

    for entry in list {
        let ip: IpAddr = entry
            .get_str(b"ip")
            .ok_or_else(|| BittorrentError::TrackerProtocol("Missing peer 'ip'".to_string()))?
            .parse()
            .map_err(|_| BittorrentError::TrackerProtocol("Invalid peer IP address".to_string()))?;

        let port = entry
            .get_u64(b"port")
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| {
                BittorrentError::TrackerProtocol("Missing or invalid peer 'port'".to_string())
            })?;

        let peer = match entry.get_bytes(b"peer id") {
            Some(id) => Peer::with_peer_id(ip, port, id.to_vec()),
            None => Peer::new(ip, port),
        };
        peers.push(peer);
    }

    Ok(peers)
}
