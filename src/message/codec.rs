use std::fmt::Formatter;
use std::io::{Error, ErrorKind, Result};

use bit_set::BitSet;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::WireSize;
use crate::message::{Block, BlockData, Message};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_PORT: u8 = 9;
const ID_EXTENDED: u8 = 20;
const LENGTH_SIZE: usize = 4;
/// Piece index, offset and length, as in request and cancel.
const BLOCK_SIZE: usize = 12;

/// Frames peer messages, refusing frames longer than `max_length`.
pub struct MessageCodec {
    max_length: usize,
}

impl MessageCodec {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Message {
    /// `None` for keep-alives, which have no id.
    fn id(&self) -> Option<u8> {
        let id = match self {
            Self::KeepAlive => return None,
            Self::Choke => ID_CHOKE,
            Self::Unchoke => ID_UNCHOKE,
            Self::Interested => ID_INTERESTED,
            Self::NotInterested => ID_NOT_INTERESTED,
            Self::Have(_) => ID_HAVE,
            Self::Bitfield(_) => ID_BITFIELD,
            Self::Request(_) => ID_REQUEST,
            Self::Piece(_) => ID_PIECE,
            Self::Cancel(_) => ID_CANCEL,
            Self::Port(_) => ID_PORT,
            Self::Extended(..) => ID_EXTENDED,
        };
        Some(id)
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::new(ErrorKind::InvalidInput, "value exceeds u32"))
}

fn put_block(block: &Block, dst: &mut BytesMut) -> Result<()> {
    dst.put_u32(to_u32(block.piece)?);
    dst.put_u32(to_u32(block.offset)?);
    dst.put_u32(to_u32(block.length)?);
    Ok(())
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let size = item.wire_size();
        dst.reserve(size);
        dst.put_u32(to_u32(size - LENGTH_SIZE)?);
        if let Some(id) = item.id() {
            dst.put_u8(id);
        }
        match item {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have(piece) => dst.put_u32(to_u32(piece)?),
            Message::Bitfield(pieces) => dst.extend_from_slice(&pieces.get_ref().to_bytes()),
            Message::Request(block) | Message::Cancel(block) => put_block(&block, dst)?,
            Message::Piece(block) => {
                dst.put_u32(to_u32(block.piece)?);
                dst.put_u32(to_u32(block.offset)?);
                dst.extend_from_slice(&block.data);
            }
            Message::Port(port) => dst.put_u16(port),
            Message::Extended(id, payload) => {
                dst.put_u8(id);
                dst.extend_from_slice(&payload);
            }
        }
        Ok(())
    }
}

fn get_block(payload: &mut BytesMut) -> Block {
    Block::new(
        payload.get_u32() as usize,
        payload.get_u32() as usize,
        payload.get_u32() as usize,
    )
}

impl Decoder for MessageCodec {
    type Error = Error;
    type Item = Message;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(prefix) = src.get(..LENGTH_SIZE) else {
            return Ok(None);
        };
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if length > self.max_length {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds {}", length, self.max_length),
            ));
        }
        if src.len() < LENGTH_SIZE + length {
            src.reserve(LENGTH_SIZE + length - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_SIZE);
        let mut payload = src.split_to(length);
        if payload.is_empty() {
            return Ok(Some(Message::KeepAlive));
        }

        let id = payload.get_u8();
        let message = match (id, payload.len()) {
            (ID_CHOKE, 0) => Message::Choke,
            (ID_UNCHOKE, 0) => Message::Unchoke,
            (ID_INTERESTED, 0) => Message::Interested,
            (ID_NOT_INTERESTED, 0) => Message::NotInterested,
            (ID_HAVE, 4) => Message::Have(payload.get_u32() as usize),
            (ID_BITFIELD, _) => Message::Bitfield(BitSet::from_bytes(&payload)),
            (ID_REQUEST, BLOCK_SIZE) => Message::Request(get_block(&mut payload)),
            (ID_CANCEL, BLOCK_SIZE) => Message::Cancel(get_block(&mut payload)),
            (ID_PIECE, 8..) => Message::Piece(BlockData {
                piece: payload.get_u32() as usize,
                offset: payload.get_u32() as usize,
                data: payload.to_vec(),
            }),
            (ID_PORT, 2) => Message::Port(payload.get_u16()),
            (ID_EXTENDED, 1..) => Message::Extended(payload.get_u8(), payload.to_vec()),
            (id, length) => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("invalid message id {} with {} byte payload", id, length),
                ));
            }
        };
        Ok(Some(message))
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepAlive => f.write_str("KeepAlive"),
            Self::Choke => f.write_str("Choke"),
            Self::Unchoke => f.write_str("Unchoke"),
            Self::Interested => f.write_str("Interested"),
            Self::NotInterested => f.write_str("NotInterested"),
            Self::Have(piece) => write!(f, "Have({})", piece),
            Self::Bitfield(pieces) => write!(f, "Bitfield(<{} of {}>)", pieces.len(), pieces.get_ref().len()),
            Self::Request(block) => write!(f, "Request({:?})", block),
            Self::Piece(block) => write!(
                f,
                "Piece({}, {}, <{} bytes>)",
                block.piece,
                block.offset,
                block.data.len()
            ),
            Self::Cancel(block) => write!(f, "Cancel({:?})", block),
            Self::Port(port) => write!(f, "Port({})", port),
            Self::Extended(id, payload) => write!(f, "Extended({}, <{} bytes>)", id, payload.len()),
        }
    }
}

impl WireSize for Message {
    fn wire_size(&self) -> usize {
        let payload = match self {
            Self::KeepAlive => 0,
            Self::Choke | Self::Unchoke | Self::Interested | Self::NotInterested => 0,
            Self::Have(_) => 4,
            Self::Bitfield(pieces) => pieces.get_ref().to_bytes().len(),
            Self::Request(_) | Self::Cancel(_) => BLOCK_SIZE,
            Self::Piece(block) => 8 + block.data.len(),
            Self::Port(_) => 2,
            Self::Extended(_, payload) => 1 + payload.len(),
        };
        let id = if matches!(self, Self::KeepAlive) { 0 } else { 1 };
        LENGTH_SIZE + id + payload
    }
}
