use super::bitfield_pieces;

/// How many peers are known to hold each piece. Shared by every connection
/// of a download and only ever incremented.
#[derive(Debug, Clone)]
pub struct PieceAvailability {
    counts: Vec<u32>,
}

impl PieceAvailability {
    pub fn new(total_pieces: usize) -> Self {
        Self {
            counts: vec![0; total_pieces],
        }
    }

    /// Record one more holder of `piece_index`. Out-of-range indices are ignored.
    pub fn increment(&mut self, piece_index: u32) {
        if let Some(count) = self.counts.get_mut(piece_index as usize) {
            *count += 1;
        }
    }

    /// Record a peer's whole bitfield. Spare bits past the last piece are ignored.
    pub fn add_bitfield(&mut self, bitfield: &[u8]) {
        for piece_index in bitfield_pieces(bitfield) {
            self.increment(piece_index);
        }
    }

    /// Known holders of `piece_index`; 0 for unknown indices.
    pub fn count(&self, piece_index: u32) -> u32 {
        self.counts.get(piece_index as usize).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}
