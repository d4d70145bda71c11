use std::io::{Error, ErrorKind, Result};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{ReadFrom, WireSize, WriteTo, read_array};
use crate::core::{PeerId, Sha1};

const PROTOCOL: &str = "BitTorrent protocol";
/// Reserved byte and mask advertising the extension protocol (BEP 10).
const EXTENSION_PROTOCOL: (usize, u8) = (5, 0x10);

/// First thing both sides send: `<pstrlen><pstr><reserved><info_hash><peer_id>`.
///
/// The side accepting a connection reads the info hash before answering, so one listener can
/// serve every transfer.
#[derive(Debug, PartialEq, Clone)]
pub struct Handshake {
    pub protocol: String,
    pub reserved: [u8; 8],
    pub info_hash: Sha1,
    pub peer_id: PeerId,
}

impl Handshake {
    /// Our own handshake, always advertising extension support.
    pub fn new(info_hash: Sha1, peer_id: PeerId) -> Self {
        let mut reserved = [0; 8];
        let (byte, mask) = EXTENSION_PROTOCOL;
        reserved[byte] |= mask;
        Self {
            protocol: PROTOCOL.to_string(),
            reserved,
            info_hash,
            peer_id,
        }
    }

    pub fn is_standard_protocol(&self) -> bool {
        self.protocol == PROTOCOL
    }

    pub fn supports_extensions(&self) -> bool {
        let (byte, mask) = EXTENSION_PROTOCOL;
        self.reserved[byte] & mask != 0
    }
}

impl ReadFrom for Handshake {
    async fn read_from<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let length = stream.read_u8().await?;
        let mut protocol = vec![0; usize::from(length)];
        stream.read_exact(&mut protocol).await?;
        let protocol =
            String::from_utf8(protocol).map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
        Ok(Self {
            protocol,
            reserved: read_array(stream).await?,
            info_hash: Sha1(read_array(stream).await?),
            peer_id: PeerId(read_array(stream).await?),
        })
    }
}

impl WriteTo for Handshake {
    async fn write_to<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()> {
        let length = u8::try_from(self.protocol.len())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "protocol string too long"))?;
        let mut buf = Vec::with_capacity(self.wire_size());
        buf.push(length);
        buf.extend_from_slice(self.protocol.as_bytes());
        buf.extend_from_slice(&self.reserved);
        buf.extend_from_slice(&self.info_hash.0);
        buf.extend_from_slice(&self.peer_id.0);
        stream.write_all(&buf).await?;
        stream.flush().await
    }
}

impl WireSize for Handshake {
    fn wire_size(&self) -> usize {
        1 + self.protocol.len() + 8 + 20 + 20
    }
}
