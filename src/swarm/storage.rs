use std::io::{self, SeekFrom};
use std::path::PathBuf;

use bit_set::BitSet;
use log::debug;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::core::Sha1;
use crate::torrent::{FileEntry, Info};

/// Maps the torrent's contiguous byte stream onto the files under `root`.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    files: Vec<FileEntry>,
}

impl Storage {
    pub fn new(root: PathBuf, info: &Info) -> Self {
        Self {
            root,
            files: info.files(),
        }
    }

    fn path(&self, file: &FileEntry) -> PathBuf {
        file.components()
            .fold(self.root.clone(), |path, component| path.join(component))
    }

    /// Files overlapping `[offset, offset + length)`, with the position and length of the overlap
    /// inside each file.
    fn spans(&self, offset: u64, length: u64) -> impl Iterator<Item = (&FileEntry, u64, u64)> {
        let end = offset + length;
        self.files
            .iter()
            .filter(move |file| file.length > 0 && file.offset < end && offset < file.end())
            .map(move |file| {
                let start = offset.max(file.offset);
                let stop = end.min(file.end());
                (file, start - file.offset, stop - start)
            })
    }

    pub async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        for (file, position, length) in self.spans(offset, buf.len() as u64) {
            let length = length as usize;
            let mut handle = File::open(self.path(file)).await?;
            handle.seek(SeekFrom::Start(position)).await?;
            handle.read_exact(&mut buf[filled..filled + length]).await?;
            filled += length;
        }
        if filled < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past the end of the torrent",
            ));
        }
        Ok(())
    }

    pub async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        for (file, position, length) in self.spans(offset, data.len() as u64) {
            let length = length as usize;
            let path = self.path(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut handle = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .await?;
            handle.seek(SeekFrom::Start(position)).await?;
            handle.write_all(&data[written..written + length]).await?;
            handle.flush().await?;
            written += length;
        }
        Ok(())
    }

    /// Hashes whatever is already on disk and returns the pieces that check out.
    pub async fn verify(&self, info: &Info) -> BitSet {
        let mut have = BitSet::with_capacity(info.total_pieces());
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return have;
        }
        for (piece, expected) in info.pieces.iter().enumerate() {
            let mut data = vec![0; info.piece_size(piece)];
            match self.read_at(info.piece_offset(piece), &mut data).await {
                Ok(()) if Sha1::digest(&data) == *expected => {
                    have.insert(piece);
                }
                Ok(()) => (),
                Err(err) => debug!("piece {} not on disk: {}", piece, err),
            }
        }
        have
    }
}
