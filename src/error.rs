use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("Bencode parsing error: {0}")]
    BencodeError(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Malformed peer message: {0}")]
    MalformedMessage(String),

    #[error("Unknown message ID: {0}")]
    UnknownMessageId(u8),

    #[error("Peer connection error: {0}")]
    PeerError(String),

    #[error("Tracker did not respond after {attempts} attempts")]
    TrackerTimeout { attempts: u32 },

    #[error("Tracker protocol error: {0}")]
    TrackerProtocol(String),

    #[error("Unsupported tracker URL: {0}")]
    UnsupportedTracker(String),

    #[error("Peer channel is not writable")]
    ChannelUnwritable,

    #[error("Storage I/O error: {0}")]
    StorageIo(#[source] std::io::Error),

    #[error("Storage already finalized")]
    StorageClosed,

    #[error("No peers available from any tracker")]
    NoPeers,

    #[error("Download stalled: {0}")]
    Stalled(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),
}

impl From<url::ParseError> for BittorrentError {
    fn from(err: url::ParseError) -> Self {
        BittorrentError::UrlParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
