mod connection;
mod download;
mod framer;
mod handshake;
mod message;
mod upload;

pub use connection::PeerConnection;
pub use download::{DownloadContext, DownloadSession, Progress};
pub use framer::{Frame, Framer};
pub use handshake::Handshake;
pub use message::PeerMessage;
pub use upload::{SeedContext, UploadSession};

/// Lifecycle of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the remote handshake
    AwaitingHandshake,
    /// Exchanging length-prefixed messages
    Active,
    Closed,
}
