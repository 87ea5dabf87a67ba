use crate::error::{BittorrentError, Result};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// 1 + 19 + 8 + 20 + 20
    pub const LEN: usize = 49 + PROTOCOL_STRING.len();

    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serialize handshake to bytes; reserved bytes are all zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.push(PROTOCOL_STRING.len() as u8);
        buf.extend_from_slice(PROTOCOL_STRING);
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// Parse a complete handshake frame. Its length must be exactly
    /// `49 + pstrlen`, and the protocol name must be the BitTorrent one.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let pstrlen = *data
            .first()
            .ok_or_else(|| BittorrentError::MalformedMessage("Empty handshake".to_string()))?
            as usize;

        if data.len() != 49 + pstrlen {
            return Err(BittorrentError::MalformedMessage(format!(
                "Handshake is {} bytes, expected {}",
                data.len(),
                49 + pstrlen
            )));
        }

        if &data[1..1 + pstrlen] != PROTOCOL_STRING {
            return Err(BittorrentError::MalformedMessage(
                "Invalid protocol string".to_string(),
            ));
        }

        let rest = &data[1 + pstrlen + 8..];
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&rest[..20]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&rest[20..40]);

        Ok(Handshake { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = handshake.to_bytes();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_STRING);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);

        assert_eq!(Handshake::from_bytes(&bytes).unwrap(), handshake);
    }

    #[test]
    fn test_reserved_bits_are_ignored() {
        let mut bytes = Handshake::new([3u8; 20], [4u8; 20]).to_bytes();
        bytes[25] = 0x10;
        assert!(Handshake::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_rejects_foreign_protocol() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).to_bytes();
        bytes[1] = b'b';
        assert!(Handshake::from_bytes(&bytes).is_err());

        let mut other = vec![4u8];
        other.extend_from_slice(b"Nope");
        other.extend_from_slice(&[0u8; 48]);
        assert!(Handshake::from_bytes(&other).is_err());
        assert!(Handshake::from_bytes(&[]).is_err());
    }
}
