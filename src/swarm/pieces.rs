use std::collections::HashMap;
use std::ops::Range;

use bit_set::BitSet;

use crate::torrent::Info;

pub type ReaderId = u64;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Priority {
    None,
    Normal,
    Readahead,
    Now,
}

/// Completion and scheduling state of a transfer's pieces.
#[derive(Debug)]
pub struct Pieces {
    piece_size: u64,
    total_size: u64,
    total_pieces: usize,
    have: BitSet,
    in_flight: BitSet,
    completed_bytes: u64,
    download_all: bool,
    windows: HashMap<ReaderId, Range<usize>>,
}

impl Pieces {
    pub fn new(info: &Info, have: BitSet) -> Self {
        let mut pieces = Self {
            piece_size: info.piece_size as u64,
            total_size: info.total_size(),
            total_pieces: info.total_pieces(),
            have: BitSet::with_capacity(info.total_pieces()),
            in_flight: BitSet::with_capacity(info.total_pieces()),
            completed_bytes: 0,
            download_all: false,
            windows: HashMap::new(),
        };
        let total_pieces = pieces.total_pieces;
        for piece in have.iter().filter(|piece| *piece < total_pieces) {
            pieces.complete(piece);
        }
        pieces
    }

    pub fn has(&self, piece: usize) -> bool {
        self.have.contains(piece)
    }

    /// Completed pieces as a bitfield sized to the piece count, ready to be sent to peers.
    pub fn bitfield(&self) -> BitSet {
        let mut bits = self.have.clone().into_bit_vec();
        if bits.len() < self.total_pieces {
            bits.grow(self.total_pieces - bits.len(), false);
        } else {
            bits.truncate(self.total_pieces);
        }
        BitSet::from_bit_vec(bits)
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.have.len() == self.total_pieces
    }

    /// Returns true if the flag changed.
    pub fn download_all(&mut self) -> bool {
        !std::mem::replace(&mut self.download_all, true)
    }

    /// Returns true if the window changed.
    pub fn set_window(&mut self, reader: ReaderId, window: Range<usize>) -> bool {
        self.windows.insert(reader, window.clone()) != Some(window)
    }

    pub fn remove_window(&mut self, reader: ReaderId) -> bool {
        self.windows.remove(&reader).is_some()
    }

    pub fn priority(&self, piece: usize) -> Priority {
        let mut priority = if self.download_all {
            Priority::Normal
        } else {
            Priority::None
        };
        for window in self.windows.values() {
            if window.start == piece {
                return Priority::Now;
            }
            if window.contains(&piece) {
                priority = Priority::Readahead;
            }
        }
        priority
    }

    /// Claims the most urgent piece the peer has that is neither completed nor claimed by another
    /// connection. Ties go to the lowest index.
    pub fn pick(&mut self, peer_has: &BitSet) -> Option<usize> {
        let piece = peer_has
            .iter()
            .filter(|piece| {
                *piece < self.total_pieces
                    && !self.have.contains(*piece)
                    && !self.in_flight.contains(*piece)
            })
            .map(|piece| (self.priority(piece), piece))
            .filter(|(priority, _)| *priority > Priority::None)
            .min_by_key(|(priority, piece)| (std::cmp::Reverse(*priority), *piece))
            .map(|(_, piece)| piece)?;
        self.in_flight.insert(piece);
        Some(piece)
    }

    pub fn release(&mut self, piece: usize) {
        self.in_flight.remove(piece);
    }

    /// Returns true if the piece was not completed before.
    pub fn complete(&mut self, piece: usize) -> bool {
        self.in_flight.remove(piece);
        if piece >= self.total_pieces || !self.have.insert(piece) {
            return false;
        }
        self.completed_bytes += self.piece_length(piece);
        true
    }

    /// Whether the peer has any piece still missing here.
    pub fn wants_from(&self, peer_has: &BitSet) -> bool {
        peer_has
            .iter()
            .any(|piece| piece < self.total_pieces && !self.have.contains(piece))
    }

    /// Number of contiguous completed bytes starting at `offset`, capped at `max`.
    pub fn available(&self, offset: u64, max: u64) -> u64 {
        let mut available = 0;
        let mut position = offset;
        while available < max && position < self.total_size {
            let piece = (position / self.piece_size) as usize;
            if !self.have.contains(piece) {
                break;
            }
            let piece_end = (piece as u64 + 1) * self.piece_size;
            let piece_end = piece_end.min(self.total_size);
            available += piece_end - position;
            position = piece_end;
        }
        available.min(max)
    }

    fn piece_length(&self, piece: usize) -> u64 {
        let start = piece as u64 * self.piece_size;
        (start + self.piece_size).min(self.total_size) - start
    }
}
