mod availability;
mod queue;
mod store;

pub use availability::PieceAvailability;
pub use queue::RequestQueue;
pub use store::PieceStore;

pub use crate::torrent::BLOCK_LEN;

use crate::torrent::TorrentInfo;

/// A block within a piece: the unit of a wire-level request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceBlock {
    /// Piece index
    pub index: u32,
    /// Byte offset within the piece
    pub begin: u32,
    /// Length of the block
    pub length: u32,
}

impl PieceBlock {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }
}

/// Piece indices whose bit is set, byte by byte, most significant bit first.
pub fn bitfield_pieces(bitfield: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bitfield.iter().enumerate().flat_map(|(byte_index, &byte)| {
        (0..8u32)
            .filter(move |bit| byte & (0x80 >> bit) != 0)
            .map(move |bit| byte_index as u32 * 8 + bit)
    })
}

/// Everything the peer connections of one download share. Callers hold it
/// behind a single lock so that store and availability change together.
#[derive(Debug)]
pub struct TransferState {
    pub store: PieceStore,
    pub availability: PieceAvailability,
}

impl TransferState {
    pub fn new(info: &TorrentInfo) -> Self {
        Self {
            store: PieceStore::new(info),
            availability: PieceAvailability::new(info.piece_count()),
        }
    }

    /// Pick the next block to ask this peer for, rarest piece first.
    ///
    /// Pieces with nothing left to request are dropped from the queue. The
    /// returned block is already marked requested.
    pub fn next_request(&mut self, queue: &mut RequestQueue) -> Option<PieceBlock> {
        if queue.is_choked() {
            return None;
        }

        let mut candidates = queue.all();
        candidates.sort_by_key(|&index| self.availability.count(index));

        for index in candidates {
            if self.store.piece_needed(index) {
                if let Some(block) = self.store.next_needed_block(index) {
                    self.store.add_requested(&block);
                    return Some(block);
                }
            }
            queue.remove(index);
        }

        None
    }
}
