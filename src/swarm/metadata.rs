use anyhow::{Result, bail};

use crate::message::METADATA_PIECE_SIZE;

/// Upper bound for metadata announced by peers, anything bigger is refused.
pub(crate) const MAX_METADATA_SIZE: usize = 16 * 1024 * 1024;

fn total_pieces(size: usize) -> usize {
    size.div_ceil(METADATA_PIECE_SIZE)
}

/// The slice of `raw` sent as metadata piece `piece`.
pub fn metadata_piece(raw: &[u8], piece: usize) -> Option<&[u8]> {
    let start = piece.checked_mul(METADATA_PIECE_SIZE)?;
    if start >= raw.len() {
        return None;
    }
    let end = (start + METADATA_PIECE_SIZE).min(raw.len());
    Some(&raw[start..end])
}

/// Collects the info dictionary from `ut_metadata` data messages.
#[derive(Debug)]
pub struct MetadataAssembler {
    size: usize,
    pieces: Vec<Option<Vec<u8>>>,
    next_request: usize,
}

impl MetadataAssembler {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size > MAX_METADATA_SIZE {
            bail!("invalid metadata size {}", size);
        }
        Ok(Self {
            size,
            pieces: vec![None; total_pieces(size)],
            next_request: 0,
        })
    }

    /// Next metadata piece to ask for. Each piece is requested once.
    pub fn next_request(&mut self) -> Option<usize> {
        if self.next_request < self.pieces.len() {
            self.next_request += 1;
            Some(self.next_request - 1)
        } else {
            None
        }
    }

    /// Returns true once every piece has been received.
    pub fn add(&mut self, piece: usize, total_size: usize, data: Vec<u8>) -> Result<bool> {
        if total_size != self.size {
            bail!("metadata size changed from {} to {}", self.size, total_size);
        }
        let expected = (self.size - piece.saturating_mul(METADATA_PIECE_SIZE).min(self.size))
            .min(METADATA_PIECE_SIZE);
        match self.pieces.get_mut(piece) {
            Some(slot) if data.len() == expected => *slot = Some(data),
            Some(_) => bail!("metadata piece {} has {} bytes", piece, data.len()),
            None => bail!("invalid metadata piece {}", piece),
        }
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(Option::is_some)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size);
        for piece in self.pieces.into_iter().flatten() {
            bytes.extend(piece);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_two_pieces() {
        let raw: Vec<u8> = (0..METADATA_PIECE_SIZE + 10).map(|i| i as u8).collect();
        let mut assembler = MetadataAssembler::new(raw.len()).unwrap();

        assert_eq!(assembler.next_request(), Some(0));
        assert_eq!(assembler.next_request(), Some(1));
        assert_eq!(assembler.next_request(), None);

        let last = metadata_piece(&raw, 1).unwrap().to_vec();
        assert_eq!(last.len(), 10);
        assert!(!assembler.add(1, raw.len(), last).unwrap());
        let first = metadata_piece(&raw, 0).unwrap().to_vec();
        assert!(assembler.add(0, raw.len(), first).unwrap());

        assert_eq!(assembler.into_bytes(), raw);
    }

    #[test]
    fn reject_bad_pieces() {
        let mut assembler = MetadataAssembler::new(100).unwrap();

        assert!(assembler.add(0, 101, vec![0; 100]).is_err());
        assert!(assembler.add(0, 100, vec![0; 99]).is_err());
        assert!(assembler.add(1, 100, vec![]).is_err());
        assert!(!assembler.is_complete());
    }

    #[test]
    fn refuse_silly_sizes() {
        assert!(MetadataAssembler::new(0).is_err());
        assert!(MetadataAssembler::new(MAX_METADATA_SIZE + 1).is_err());
    }

    #[test]
    fn serve_pieces() {
        let raw = vec![7; 10];

        assert_eq!(metadata_piece(&raw, 0), Some(&raw[..]));
        assert_eq!(metadata_piece(&raw, 1), None);
    }
}
