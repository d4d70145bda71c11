//! Structures read straight off a byte stream rather than through a length-prefixed frame: the
//! peer handshake and bencoded metainfo files.

use std::io::{Error, ErrorKind, Result};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

pub trait ReadFrom: Sized {
    async fn read_from<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self>;
}

pub trait WriteTo {
    async fn write_to<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()>;
}

/// Bytes a message occupies on the wire, length prefix included.
pub trait WireSize {
    fn wire_size(&self) -> usize;
}

/// Like `ReadFrom::read_from`, failing with `TimedOut` if the value is not complete in time.
pub async fn read_within<T, S>(stream: &mut S, limit: Duration) -> Result<T>
where
    T: ReadFrom,
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(limit, T::read_from(stream))
        .await
        .map_err(|_| Error::new(ErrorKind::TimedOut, "timed out reading from peer"))?
}

pub async fn read_array<const N: usize, S: AsyncRead + Unpin>(stream: &mut S) -> Result<[u8; N]> {
    let mut buf = [0; N];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
