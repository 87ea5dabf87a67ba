/// Transfer counters reported to a tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes still missing
    pub left: u64,
}

impl TransferStats {
    /// Counters for a transfer that has not started yet
    pub fn fresh(left: u64) -> Self {
        Self {
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }
}

/// Request parameters for tracker communication
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Unique peer ID
    pub peer_id: [u8; 20],
    /// Port this peer is listening on
    pub port: u16,
    pub stats: TransferStats,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, stats: TransferStats) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            stats,
        }
    }
}
