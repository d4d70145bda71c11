/// `length` bytes at `offset` within `piece`, as carried by request and cancel messages.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash)]
pub struct Block {
    pub piece: usize,
    pub offset: usize,
    pub length: usize,
}

impl Block {
    pub fn new(piece: usize, offset: usize, length: usize) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }

    /// Offset right after the block, within its piece.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Payload of a piece message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BlockData {
    pub piece: usize,
    pub offset: usize,
    pub data: Vec<u8>,
}

impl BlockData {
    /// The request this data answers.
    pub fn block(&self) -> Block {
        Block::new(self.piece, self.offset, self.data.len())
    }
}
