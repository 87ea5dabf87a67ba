use crate::error::{BittorrentError, Result};
use crate::piece::PieceBlock;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Messages exchanged between peers after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Zero-length frame; carries nothing
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// The sender now has this piece
    Have { piece_index: u32 },
    /// One bit per piece, most significant bit of byte 0 is piece 0
    Bitfield { bitfield: Bytes },
    Request { block: PieceBlock },
    /// A block of data answering a request
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel { block: PieceBlock },
}

impl PeerMessage {
    /// Message type IDs
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;

    /// Serialize message to bytes
    /// Format: <length prefix><message ID><payload>
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            PeerMessage::KeepAlive => buf.put_u32(0),
            PeerMessage::Choke => put_empty(&mut buf, Self::CHOKE),
            PeerMessage::Unchoke => put_empty(&mut buf, Self::UNCHOKE),
            PeerMessage::Interested => put_empty(&mut buf, Self::INTERESTED),
            PeerMessage::NotInterested => put_empty(&mut buf, Self::NOT_INTERESTED),
            PeerMessage::Have { piece_index } => {
                buf.put_u32(5);
                buf.put_u8(Self::HAVE);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_u32(1 + bitfield.len() as u32);
                buf.put_u8(Self::BITFIELD);
                buf.put_slice(bitfield);
            }
            PeerMessage::Request { block } => put_block(&mut buf, Self::REQUEST, block),
            PeerMessage::Piece {
                index,
                begin,
                block,
            } => {
                buf.put_u32(9 + block.len() as u32);
                buf.put_u8(Self::PIECE);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            PeerMessage::Cancel { block } => put_block(&mut buf, Self::CANCEL, block),
        }

        buf.freeze()
    }

    /// Decode one complete length-prefixed frame.
    ///
    /// The declared length must match the frame exactly. Unknown IDs are
    /// reported as `UnknownMessageId` so callers can skip them.
    pub fn from_frame(mut frame: Bytes) -> Result<Self> {
        if frame.len() < 4 {
            return Err(malformed("frame shorter than its length prefix"));
        }

        let length = frame.get_u32() as usize;
        if length != frame.len() {
            return Err(malformed(format!(
                "declared length {} but {} bytes follow",
                length,
                frame.len()
            )));
        }

        if length == 0 {
            return Ok(PeerMessage::KeepAlive);
        }

        let id = frame.get_u8();
        let payload = frame;

        let expect = |len: usize, name: &str| -> Result<()> {
            if payload.len() == len {
                Ok(())
            } else {
                Err(malformed(format!(
                    "{} payload is {} bytes, expected {}",
                    name,
                    payload.len(),
                    len
                )))
            }
        };

        match id {
            Self::CHOKE => expect(0, "choke").map(|_| PeerMessage::Choke),
            Self::UNCHOKE => expect(0, "unchoke").map(|_| PeerMessage::Unchoke),
            Self::INTERESTED => expect(0, "interested").map(|_| PeerMessage::Interested),
            Self::NOT_INTERESTED => {
                expect(0, "not-interested").map(|_| PeerMessage::NotInterested)
            }
            Self::HAVE => {
                expect(4, "have")?;
                let mut payload = payload;
                Ok(PeerMessage::Have {
                    piece_index: payload.get_u32(),
                })
            }
            Self::BITFIELD => Ok(PeerMessage::Bitfield { bitfield: payload }),
            Self::REQUEST => {
                expect(12, "request")?;
                Ok(PeerMessage::Request {
                    block: get_block(payload),
                })
            }
            Self::PIECE => {
                if payload.len() < 8 {
                    return Err(malformed("piece payload shorter than its header"));
                }
                let mut payload = payload;
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Ok(PeerMessage::Piece {
                    index,
                    begin,
                    block: payload,
                })
            }
            Self::CANCEL => {
                expect(12, "cancel")?;
                Ok(PeerMessage::Cancel {
                    block: get_block(payload),
                })
            }
            other => Err(BittorrentError::UnknownMessageId(other)),
        }
    }
}

fn malformed(msg: impl Into<String>) -> BittorrentError {
    BittorrentError::MalformedMessage(msg.into())
}

fn put_empty(buf: &mut BytesMut, id: u8) {
    buf.put_u32(1);
    buf.put_u8(id);
}

fn put_block(buf: &mut BytesMut, id: u8, block: &PieceBlock) {
    buf.put_u32(13);
    buf.put_u8(id);
    buf.put_u32(block.index);
    buf.put_u32(block.begin);
    buf.put_u32(block.length);
}

fn get_block(mut payload: Bytes) -> PieceBlock {
    let index = payload.get_u32();
    let begin = payload.get_u32();
    let length = payload.get_u32();
    PieceBlock::new(index, begin, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_layouts() {
        assert_eq!(PeerMessage::KeepAlive.to_bytes().as_ref(), &[0, 0, 0, 0]);
        assert_eq!(PeerMessage::Interested.to_bytes().as_ref(), &[0, 0, 0, 1, 2]);
        assert_eq!(
            PeerMessage::Have { piece_index: 258 }.to_bytes().as_ref(),
            &[0, 0, 0, 5, 4, 0, 0, 1, 2]
        );
        assert_eq!(
            PeerMessage::Request {
                block: PieceBlock::new(1, 16384, 16384)
            }
            .to_bytes()
            .as_ref(),
            &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
    }

    #[test]
    fn test_decode_piece_keeps_remaining_bytes_as_block() {
        let frame = Bytes::from_static(&[0, 0, 0, 12, 7, 0, 0, 0, 3, 0, 0, 0, 8, 0xde, 0xad, 0xbe]);
        assert_eq!(
            PeerMessage::from_frame(frame).unwrap(),
            PeerMessage::Piece {
                index: 3,
                begin: 8,
                block: Bytes::from_static(&[0xde, 0xad, 0xbe]),
            }
        );
    }

    #[test]
    fn test_decode_bitfield_and_cancel() {
        let bitfield = PeerMessage::Bitfield {
            bitfield: Bytes::from_static(&[0b1010_0000, 0x01]),
        };
        assert_eq!(PeerMessage::from_frame(bitfield.to_bytes()).unwrap(), bitfield);

        let cancel = PeerMessage::Cancel {
            block: PieceBlock::new(9, 0, 100),
        };
        assert_eq!(PeerMessage::from_frame(cancel.to_bytes()).unwrap(), cancel);
    }

    #[test]
    fn test_keep_alive() {
        let frame = Bytes::from_static(&[0, 0, 0, 0]);
        assert_eq!(PeerMessage::from_frame(frame).unwrap(), PeerMessage::KeepAlive);
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let short = Bytes::from_static(&[0, 0, 0, 5, 4, 0, 0]);
        assert!(matches!(
            PeerMessage::from_frame(short),
            Err(BittorrentError::MalformedMessage(_))
        ));

        let bad_have = Bytes::from_static(&[0, 0, 0, 3, 4, 0, 0]);
        assert!(matches!(
            PeerMessage::from_frame(bad_have),
            Err(BittorrentError::MalformedMessage(_))
        ));

        let long_choke = Bytes::from_static(&[0, 0, 0, 2, 0, 0]);
        assert!(PeerMessage::from_frame(long_choke).is_err());
    }

    #[test]
    fn test_unknown_id_is_passed_through() {
        let frame = Bytes::from_static(&[0, 0, 0, 3, 20, 1, 2]);
        assert!(matches!(
            PeerMessage::from_frame(frame),
            Err(BittorrentError::UnknownMessageId(20))
        ));
    }
}
