use anyhow::{Result, bail};

use crate::bencoding::Value;

/// Extended message id reserved for the extension handshake.
pub const EXTENDED_HANDSHAKE_ID: u8 = 0;
/// The id this client asks peers to use when sending `ut_metadata` messages.
pub const UT_METADATA_ID: u8 = 1;
/// Metadata is exchanged in pieces of 16 KiB, the last one may be shorter.
pub const METADATA_PIECE_SIZE: usize = 16 * 1024;

const UT_METADATA: &str = "ut_metadata";

/// Payload of the extension protocol handshake (BEP 10). Only the keys this client cares about
/// are kept.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct ExtendedHandshake {
    /// Id the sender wants to receive `ut_metadata` messages with, if supported.
    pub ut_metadata: Option<u8>,
    pub metadata_size: Option<usize>,
    pub client: Option<String>,
}

impl ExtendedHandshake {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut extensions = Value::dictionary();
        if let Some(id) = self.ut_metadata {
            extensions = extensions.with_entry(UT_METADATA, Value::Integer(id.into()));
        }
        let mut value = Value::dictionary().with_entry("m", extensions);
        if let Some(size) = self.metadata_size {
            value = value.with_entry("metadata_size", Value::Integer(size as i64));
        }
        if let Some(client) = &self.client {
            value = value.with_entry("v", Value::string(client));
        }
        value.to_bytes()
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let mut value = Value::from_bytes(payload)?;
        let ut_metadata = match value.try_remove_entry("m")? {
            Some(mut extensions) => match extensions.try_remove_entry(UT_METADATA)? {
                // An id of 0 means the extension got disabled
                Some(id) => Some(u8::try_from(u32::try_from(id)?)?).filter(|id| *id != 0),
                None => None,
            },
            None => None,
        };
        let metadata_size = value
            .try_remove_entry("metadata_size")?
            .map(usize::try_from)
            .transpose()?;
        let client = value
            .try_remove_entry("v")?
            .and_then(|client| String::try_from(client).ok());
        Ok(Self {
            ut_metadata,
            metadata_size,
            client,
        })
    }
}

/// `ut_metadata` messages (BEP 9).
#[derive(Debug, PartialEq, Clone)]
pub enum MetadataMessage {
    Request(usize),
    Data {
        piece: usize,
        total_size: usize,
        data: Vec<u8>,
    },
    Reject(usize),
}

const MSG_REQUEST: i64 = 0;
const MSG_DATA: i64 = 1;
const MSG_REJECT: i64 = 2;

impl MetadataMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = |msg_type: i64, piece: usize| {
            Value::dictionary()
                .with_entry("msg_type", Value::Integer(msg_type))
                .with_entry("piece", Value::Integer(piece as i64))
        };
        match self {
            Self::Request(piece) => header(MSG_REQUEST, *piece).to_bytes(),
            Self::Reject(piece) => header(MSG_REJECT, *piece).to_bytes(),
            Self::Data {
                piece,
                total_size,
                data,
            } => {
                let mut bytes = header(MSG_DATA, *piece)
                    .with_entry("total_size", Value::Integer(*total_size as i64))
                    .to_bytes();
                bytes.extend_from_slice(data);
                bytes
            }
        }
    }

    /// The dictionary of a data message is followed by the raw metadata piece.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        let (mut value, consumed) = Value::from_prefix(payload)?;
        let msg_type: i64 = value.remove_entry("msg_type")?.try_into()?;
        let piece: usize = value.remove_entry("piece")?.try_into()?;
        match msg_type {
            MSG_REQUEST => Ok(Self::Request(piece)),
            MSG_REJECT => Ok(Self::Reject(piece)),
            MSG_DATA => {
                let total_size = value.remove_entry("total_size")?.try_into()?;
                Ok(Self::Data {
                    piece,
                    total_size,
                    data: payload[consumed..].to_vec(),
                })
            }
            other => bail!("unknown ut_metadata message type {}", other),
        }
    }
}
