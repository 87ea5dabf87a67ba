use super::{PieceBlock, BLOCK_LEN};
use crate::torrent::TorrentInfo;

/// Block-level bookkeeping for one download: what has been asked for and
/// what has arrived. Held in memory only.
#[derive(Debug, Clone)]
pub struct PieceStore {
    block_lengths: Vec<Vec<u32>>,
    requested: Vec<Vec<bool>>,
    received: Vec<Vec<bool>>,
}

impl PieceStore {
    pub fn new(info: &TorrentInfo) -> Self {
        let block_lengths: Vec<Vec<u32>> = (0..info.piece_count())
            .map(|i| (0..info.blocks_per_piece(i)).map(|b| info.block_len(i, b)).collect())
            .collect();
        let blocks: Vec<Vec<bool>> = block_lengths
            .iter()
            .map(|lengths| vec![false; lengths.len()])
            .collect();

        Self {
            block_lengths,
            requested: blocks.clone(),
            received: blocks,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.block_lengths.len()
    }

    fn piece_len(&self, index: u32) -> Option<u64> {
        self.block_lengths
            .get(index as usize)
            .map(|lengths| lengths.iter().map(|&l| l as u64).sum())
    }

    fn slot<'a>(map: &'a mut [Vec<bool>], block: &PieceBlock) -> Option<&'a mut bool> {
        map.get_mut(block.index as usize)?
            .get_mut((block.begin / BLOCK_LEN) as usize)
    }

    /// Whether `block` lies within its piece.
    pub fn contains(&self, block: &PieceBlock) -> bool {
        self.piece_len(block.index)
            .map_or(false, |len| block.begin as u64 + block.length as u64 <= len)
    }

    /// Whether `block` is exactly one block slot: aligned to `BLOCK_LEN`
    /// and as long as that slot.
    pub fn is_block(&self, block: &PieceBlock) -> bool {
        block.begin % BLOCK_LEN == 0
            && self
                .block_lengths
                .get(block.index as usize)
                .and_then(|lengths| lengths.get((block.begin / BLOCK_LEN) as usize))
                .map_or(false, |&len| len == block.length)
    }

    pub fn add_requested(&mut self, block: &PieceBlock) {
        if let Some(slot) = Self::slot(&mut self.requested, block) {
            *slot = true;
        }
    }

    pub fn add_received(&mut self, block: &PieceBlock) {
        if let Some(slot) = Self::slot(&mut self.received, block) {
            *slot = true;
        }
    }

    /// Undo a request mark for a block whose request never left this host.
    pub fn release(&mut self, block: &PieceBlock) {
        let received = Self::slot(&mut self.received, block).map(|r| *r);
        if let (Some(false), Some(slot)) = (received, Self::slot(&mut self.requested, block)) {
            *slot = false;
        }
    }

    /// Once every block everywhere has been requested, forget which of them
    /// are still outstanding so that they can be asked of another peer.
    /// Received blocks stay marked.
    fn reset_if_exhausted(&mut self) {
        if self.requested.iter().all(|blocks| blocks.iter().all(|&r| r)) {
            self.requested = self.received.clone();
        }
    }

    /// Whether `block` still has to be requested from someone.
    pub fn needed(&mut self, block: &PieceBlock) -> bool {
        self.reset_if_exhausted();
        self.requested
            .get(block.index as usize)
            .and_then(|blocks| blocks.get((block.begin / BLOCK_LEN) as usize))
            .map_or(false, |&requested| !requested)
    }

    /// Whether any block of `piece_index` still has to be requested.
    pub fn piece_needed(&mut self, piece_index: u32) -> bool {
        self.reset_if_exhausted();
        self.requested
            .get(piece_index as usize)
            .map_or(false, |blocks| blocks.iter().any(|&r| !r))
    }

    /// The first block of `piece_index` that is still `needed`. Nothing is
    /// marked; the caller records the request with `add_requested`.
    pub fn next_needed_block(&mut self, piece_index: u32) -> Option<PieceBlock> {
        let lengths = self.block_lengths.get(piece_index as usize)?.clone();
        lengths
            .iter()
            .enumerate()
            .map(|(b, &length)| PieceBlock::new(piece_index, b as u32 * BLOCK_LEN, length))
            .find(|block| self.needed(block))
    }

    pub fn has_piece(&self, piece_index: u32) -> bool {
        self.received
            .get(piece_index as usize)
            .map_or(false, |blocks| blocks.iter().all(|&r| r))
    }

    pub fn is_done(&self) -> bool {
        self.received.iter().all(|blocks| blocks.iter().all(|&r| r))
    }

    /// One bit per piece, most significant bit first, set for complete pieces.
    pub fn bitfield(&self) -> Vec<u8> {
        let mut bitfield = vec![0u8; self.piece_count().div_ceil(8)];
        for (index, blocks) in self.received.iter().enumerate() {
            if blocks.iter().all(|&r| r) {
                bitfield[index / 8] |= 0x80 >> (index % 8);
            }
        }
        bitfield
    }

    /// Declare the whole content present, for seeding an existing file.
    pub fn mark_all_received(&mut self) {
        for blocks in self.received.iter_mut() {
            blocks.fill(true);
        }
        self.requested = self.received.clone();
    }

    /// `(received blocks, total blocks)`
    pub fn progress(&self) -> (usize, usize) {
        let received = self.received.iter().flatten().filter(|&&r| r).count();
        let total = self.received.iter().map(Vec::len).sum();
        (received, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::tests::test_info;

    fn all_blocks(store: &PieceStore) -> Vec<PieceBlock> {
        let mut blocks = Vec::new();
        for (index, piece) in store.received.iter().enumerate() {
            for b in 0..piece.len() {
                blocks.push(PieceBlock::new(index as u32, b as u32 * BLOCK_LEN, BLOCK_LEN));
            }
        }
        blocks
    }

    #[test]
    fn test_shape_follows_metadata() {
        let store = PieceStore::new(&test_info(3 * BLOCK_LEN as u64, 7 * BLOCK_LEN as u64 + 5));
        let shape: Vec<usize> = store.received.iter().map(Vec::len).collect();
        assert_eq!(shape, vec![3, 3, 2]);
        assert_eq!(store.progress(), (0, 8));
    }

    fn claim(store: &mut PieceStore, piece_index: u32) -> Option<PieceBlock> {
        let block = store.next_needed_block(piece_index)?;
        store.add_requested(&block);
        Some(block)
    }

    #[test]
    fn test_next_needed_block_walks_blocks_in_order() {
        let mut store = PieceStore::new(&test_info(40960, 100_000));
        assert_eq!(store.next_needed_block(0), Some(PieceBlock::new(0, 0, BLOCK_LEN)));
        // a lookup alone does not claim the block
        assert_eq!(store.next_needed_block(0), Some(PieceBlock::new(0, 0, BLOCK_LEN)));

        assert_eq!(claim(&mut store, 0), Some(PieceBlock::new(0, 0, BLOCK_LEN)));
        assert_eq!(
            claim(&mut store, 0),
            Some(PieceBlock::new(0, BLOCK_LEN, BLOCK_LEN))
        );
        assert_eq!(
            claim(&mut store, 0),
            Some(PieceBlock::new(0, 2 * BLOCK_LEN, 40960 - 2 * BLOCK_LEN))
        );
        assert_eq!(store.next_needed_block(0), None);
        assert_eq!(store.next_needed_block(7), None);
    }

    #[test]
    fn test_short_final_block_of_last_piece() {
        let mut store = PieceStore::new(&test_info(40960, 100_000));
        claim(&mut store, 2);
        assert_eq!(
            claim(&mut store, 2),
            Some(PieceBlock::new(2, BLOCK_LEN, 18080 - BLOCK_LEN))
        );
    }

    #[test]
    fn test_out_of_range_marks_are_ignored() {
        let mut store = PieceStore::new(&test_info(16384, 16384 * 2));
        store.add_requested(&PieceBlock::new(5, 0, BLOCK_LEN));
        store.add_received(&PieceBlock::new(0, 10 * BLOCK_LEN, BLOCK_LEN));
        assert_eq!(store.progress(), (0, 2));
        assert!(!store.needed(&PieceBlock::new(5, 0, BLOCK_LEN)));
    }

    #[test]
    fn test_contains_respects_piece_bounds() {
        let store = PieceStore::new(&test_info(16384, 20000));
        assert!(store.contains(&PieceBlock::new(0, 0, BLOCK_LEN)));
        assert!(store.contains(&PieceBlock::new(1, 0, 20000 - 16384)));
        assert!(!store.contains(&PieceBlock::new(1, 0, BLOCK_LEN)));
        assert!(!store.contains(&PieceBlock::new(2, 0, 1)));
    }

    #[test]
    fn test_requested_block_is_not_needed() {
        let mut store = PieceStore::new(&test_info(16384, 16384 * 2));
        let block = PieceBlock::new(0, 0, BLOCK_LEN);
        assert!(store.needed(&block));
        store.add_requested(&block);
        assert!(!store.needed(&block));
        assert!(store.needed(&PieceBlock::new(1, 0, BLOCK_LEN)));
    }

    #[test]
    fn test_everything_requested_nothing_received_is_needed_again() {
        let mut store = PieceStore::new(&test_info(32768, 100_000));
        let blocks = all_blocks(&store);
        for block in &blocks {
            store.add_requested(block);
        }
        for block in &blocks {
            assert!(store.needed(block));
        }
    }

    #[test]
    fn test_reset_keeps_received_blocks() {
        let mut store = PieceStore::new(&test_info(16384, 16384 * 3));
        let blocks = all_blocks(&store);
        for block in &blocks {
            store.add_requested(block);
        }
        store.add_received(&blocks[1]);

        assert!(store.needed(&blocks[0]));
        assert!(!store.needed(&blocks[1]));
        assert!(store.piece_needed(2));
        assert!(!store.piece_needed(1));
    }

    #[test]
    fn test_is_done_matches_full_bitfield() {
        let mut store = PieceStore::new(&test_info(16384, 16384 * 9 + 1));
        assert!(!store.is_done());
        assert_eq!(store.bitfield(), vec![0, 0]);

        for block in all_blocks(&store) {
            store.add_received(&block);
            let bits: u32 = store.bitfield().iter().map(|b| b.count_ones()).sum();
            assert_eq!(store.is_done(), bits as usize == store.piece_count());
        }
        assert!(store.is_done());
        assert_eq!(store.bitfield(), vec![0xff, 0b1100_0000]);
    }

    #[test]
    fn test_mark_all_received() {
        let mut store = PieceStore::new(&test_info(16384, 16384 * 3));
        store.mark_all_received();
        assert!(store.is_done());
        assert!(store.has_piece(2));
        assert!(!store.has_piece(3));
        assert_eq!(store.bitfield(), vec![0b1110_0000]);
        assert!(!store.piece_needed(0));
    }

    #[test]
    fn test_release_only_unmarks_missing_blocks() {
        let mut store = PieceStore::new(&test_info(16384, 16384 * 2));
        let first = claim(&mut store, 0).unwrap();
        store.release(&first);
        assert_eq!(claim(&mut store, 0), Some(first));

        store.add_received(&first);
        store.release(&first);
        assert!(!store.piece_needed(0));
    }

    #[test]
    fn test_is_block_requires_exact_slot() {
        let store = PieceStore::new(&test_info(2 * 16384, 40000));
        assert!(store.is_block(&PieceBlock::new(0, BLOCK_LEN, BLOCK_LEN)));
        assert!(store.is_block(&PieceBlock::new(1, 0, 40000 - 2 * 16384)));
        assert!(!store.is_block(&PieceBlock::new(0, 0, 10)));
        assert!(!store.is_block(&PieceBlock::new(0, 100, BLOCK_LEN)));
        assert!(!store.is_block(&PieceBlock::new(1, BLOCK_LEN, 1)));
        assert!(!store.is_block(&PieceBlock::new(2, 0, BLOCK_LEN)));
    }
}
