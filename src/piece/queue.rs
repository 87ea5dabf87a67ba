/// Pieces a single peer has announced and we may still ask it for, plus
/// whether that peer is choking us.
#[derive(Debug)]
pub struct RequestQueue {
    pieces: Vec<u32>,
    choked: bool,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            pieces: Vec::new(),
            choked: true,
        }
    }

    /// Append `piece_index` unless it is already queued.
    pub fn enqueue(&mut self, piece_index: u32) {
        if !self.pieces.contains(&piece_index) {
            self.pieces.push(piece_index);
        }
    }

    /// Snapshot of the queued pieces in insertion order.
    pub fn all(&self) -> Vec<u32> {
        self.pieces.clone()
    }

    pub fn remove(&mut self, piece_index: u32) {
        if let Some(pos) = self.pieces.iter().position(|&p| p == piece_index) {
            self.pieces.remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// The peer sent `unchoke`; requests may flow from now on.
    pub fn unchoke(&mut self) {
        self.choked = false;
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
