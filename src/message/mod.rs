//! Peer wire protocol: the handshake plus the length-prefixed messages that follow it.

mod block;
mod codec;
mod extension;
mod handshake;

use bit_set::BitSet;

pub use block::*;
pub use codec::*;
pub use extension::*;
pub use handshake::*;

/// Messages after the handshake, framed as `<u32 length><u8 id><payload>`.
#[derive(PartialEq, Eq, Clone)]
pub enum Message {
    /// Zero length frame, keeps idle connections open.
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// The sender verified this piece.
    Have(usize),
    /// Pieces the sender has, most significant bit of the first byte is piece 0. Only valid as
    /// the first message after the handshake.
    Bitfield(BitSet),
    Request(Block),
    Piece(BlockData),
    Cancel(Block),
    /// DHT port of the sender. Parsed and ignored.
    Port(u16),
    /// BEP 10 message. Id 0 is the extension handshake, others are the ids the receiver
    /// assigned in its own handshake.
    Extended(u8, Vec<u8>),
}
