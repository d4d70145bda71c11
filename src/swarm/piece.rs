use crate::message::{Block, BlockData};

/// Splits a piece into block requests of at most `block_size` bytes.
pub struct Blocks {
    block_size: usize,
    piece: usize,
    offset: usize,
    end: usize,
}

impl Blocks {
    pub fn new(piece: usize, piece_size: usize, block_size: usize) -> Self {
        Self {
            block_size,
            piece,
            offset: 0,
            end: piece_size,
        }
    }
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset < self.end {
            let block_size = self.block_size.min(self.end - self.offset);
            let block = Block::new(self.piece, self.offset, block_size);
            self.offset += block_size;
            Some(block)
        } else {
            None
        }
    }
}

/// Collects the blocks of a single piece as they arrive, in any order.
pub struct PieceDownload {
    pub piece: usize,
    size: usize,
    block_size: usize,
    pending: Blocks,
    blocks: Vec<Option<Vec<u8>>>,
}

impl PieceDownload {
    pub fn new(piece: usize, size: usize, block_size: usize) -> Self {
        Self {
            piece,
            size,
            block_size,
            pending: Blocks::new(piece, size, block_size),
            blocks: vec![None; size.div_ceil(block_size)],
        }
    }

    /// Next block that has not been requested yet.
    pub fn next_request(&mut self) -> Option<Block> {
        self.pending.next()
    }

    /// Returns true once every block has been received.
    pub fn add(&mut self, block_data: BlockData) -> bool {
        let index = block_data.offset / self.block_size;
        if block_data.piece == self.piece && block_data.offset % self.block_size == 0 {
            if let Some(slot) = self.blocks.get_mut(index) {
                *slot = Some(block_data.data);
            }
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(Option::is_some)
    }

    pub fn into_data(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.size);
        for block in self.blocks.into_iter().flatten() {
            data.extend(block);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: usize = 1024;

    #[test]
    fn one_piece_one_block() {
        let mut blocks = Blocks::new(0, 1024, BLOCK_SIZE);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn uneven_block_sizes() {
        let mut blocks = Blocks::new(1, BLOCK_SIZE + 42, BLOCK_SIZE);

        assert_eq!(Some(Block::new(1, 0, BLOCK_SIZE)), blocks.next());
        assert_eq!(Some(Block::new(1, 1024, 42)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn assemble_blocks_out_of_order() {
        let mut download = PieceDownload::new(3, BLOCK_SIZE + 2, BLOCK_SIZE);
        assert_eq!(download.next_request(), Some(Block::new(3, 0, BLOCK_SIZE)));
        assert_eq!(download.next_request(), Some(Block::new(3, BLOCK_SIZE, 2)));
        assert_eq!(download.next_request(), None);

        let complete = download.add(BlockData {
            piece: 3,
            offset: BLOCK_SIZE,
            data: vec![9, 9],
        });
        assert!(!complete);
        let complete = download.add(BlockData {
            piece: 3,
            offset: 0,
            data: vec![1; BLOCK_SIZE],
        });
        assert!(complete);

        let data = download.into_data();
        assert_eq!(data.len(), BLOCK_SIZE + 2);
        assert_eq!(&data[BLOCK_SIZE..], &[9, 9]);
    }

    #[test]
    fn ignore_misaligned_block() {
        let mut download = PieceDownload::new(0, BLOCK_SIZE, BLOCK_SIZE);

        let complete = download.add(BlockData {
            piece: 0,
            offset: 7,
            data: vec![0; 10],
        });

        assert!(!complete);
    }
}
