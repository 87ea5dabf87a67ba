use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A peer address as handed out by a tracker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<Vec<u8>>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    pub fn with_peer_id(ip: IpAddr, port: u16, peer_id: Vec<u8>) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: Some(peer_id),
        }
    }

    /// One compact entry: IPv4 address then big-endian port.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        let entry: [u8; 6] = data.try_into().ok()?;
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        Some(Self::new(IpAddr::V4(ip), u16::from_be_bytes([entry[4], entry[5]])))
    }

    /// Parse a compact peer list. A trailing partial entry is ignored.
    pub fn from_compact_list(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(6)
            .filter_map(Self::from_compact)
            .collect()
    }
}
