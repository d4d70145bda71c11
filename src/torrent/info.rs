use anyhow::{Error, Result, anyhow, bail};

use crate::bencoding::Value;
use crate::core::Sha1;
use crate::torrent::DownloadType;

const SHA1_LEN: usize = 20;

#[derive(PartialEq, Eq, Clone)]
pub struct Info {
    pub info_hash: Sha1,
    pub piece_size: usize,
    pub pieces: Vec<Sha1>,
    pub download_type: DownloadType,
    /// The info dictionary exactly as it was received, `info_hash` is computed over these bytes.
    raw: Vec<u8>,
}

/// A file laid out in the torrent's contiguous byte stream.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileEntry {
    /// Slash separated path. Multi-file torrents include the torrent name as first component.
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

impl FileEntry {
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

impl Info {
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let value = Value::from_bytes(&raw)?;
        Self::parse(value, raw)
    }

    fn parse(mut value: Value, raw: Vec<u8>) -> Result<Self> {
        let info_hash = Sha1::digest(&raw);
        let piece_size: usize = value.remove_entry("piece length")?.try_into()?;
        if piece_size == 0 {
            bail!("piece length must be positive");
        }
        let pieces: Vec<u8> = value.remove_entry("pieces")?.try_into()?;
        let pieces = Info::build_pieces(&pieces)?;
        let download_type: DownloadType = value.try_into()?;
        let expected = download_type.total_size().div_ceil(piece_size as u64);
        if pieces.len() as u64 != expected {
            bail!(
                "expected {} piece hashes for {} bytes, got {}",
                expected,
                download_type.total_size(),
                pieces.len()
            );
        }
        Ok(Info {
            info_hash,
            piece_size,
            pieces,
            download_type,
            raw,
        })
    }

    fn build_pieces(pieces: &[u8]) -> Result<Vec<Sha1>> {
        if pieces.len() % SHA1_LEN != 0 {
            return Err(anyhow!(
                "invalid length {}. must be a multiple of {}",
                pieces.len(),
                SHA1_LEN
            ));
        }
        Ok(pieces
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut bytes = [0; SHA1_LEN];
                bytes.copy_from_slice(chunk);
                Sha1(bytes)
            })
            .collect())
    }

    pub fn name(&self) -> &str {
        self.download_type.name()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece_size(&self, piece: usize) -> usize {
        let piece_start = self.piece_offset(piece);
        let piece_end = (piece_start + self.piece_size as u64).min(self.total_size());
        piece_end.saturating_sub(piece_start) as usize
    }

    pub fn piece_offset(&self, piece: usize) -> u64 {
        self.piece_size as u64 * piece as u64
    }

    /// Index of the piece containing the byte at `offset`.
    pub fn piece_at(&self, offset: u64) -> usize {
        (offset / self.piece_size as u64) as usize
    }

    pub fn total_size(&self) -> u64 {
        self.download_type.total_size()
    }

    pub fn files(&self) -> Vec<FileEntry> {
        match &self.download_type {
            DownloadType::SingleFile { name, size } => vec![FileEntry {
                path: name.clone(),
                offset: 0,
                length: *size,
            }],
            DownloadType::MultiFile {
                directory_name,
                files,
            } => {
                let mut offset = 0;
                files
                    .iter()
                    .map(|file| {
                        let entry = FileEntry {
                            path: format!("{}/{}", directory_name, file.path.join("/")),
                            offset,
                            length: file.size,
                        };
                        offset += file.size;
                        entry
                    })
                    .collect()
            }
        }
    }
}

impl TryFrom<Value> for Info {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let raw = value.to_bytes();
        Self::parse(value, raw)
    }
}

impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("info_hash", &self.info_hash)
            .field("piece_size", &self.piece_size)
            .field("pieces", &self.pieces.len())
            .field("download_type", &self.download_type)
            .finish()
    }
}
