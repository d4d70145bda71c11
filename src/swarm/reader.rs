use std::io::{self, ErrorKind, SeekFrom};
use std::sync::Arc;

use tokio::sync::watch;

use crate::swarm::pieces::ReaderId;
use crate::swarm::transfer::Transfer;
use crate::torrent::FileEntry;

/// Reads one file of a transfer, waiting for pieces that are not downloaded yet. While a reader
/// is alive the pieces at and after its position are fetched before anything else.
pub struct FileReader {
    transfer: Arc<Transfer>,
    file: FileEntry,
    position: u64,
    id: ReaderId,
    responsive: bool,
    readahead: u64,
    changes: watch::Receiver<u64>,
}

impl FileReader {
    pub(crate) fn new(transfer: Arc<Transfer>, file: FileEntry) -> Self {
        let id = transfer.next_reader_id();
        let readahead = transfer.config().readahead.bytes() as u64;
        let changes = transfer.subscribe();
        Self {
            transfer,
            file,
            position: 0,
            id,
            responsive: false,
            readahead,
            changes,
        }
    }

    /// A responsive reader returns as soon as some bytes are available instead of waiting for the
    /// whole buffer.
    pub fn set_responsive(&mut self) {
        self.responsive = true;
    }

    /// Controls how many bytes past the read position get prioritised. Takes effect on the next
    /// read.
    #[cfg(test)]
    pub fn set_readahead(&mut self, readahead: u64) {
        self.readahead = readahead;
    }

    /// Moves the read position. Seeking past the end is allowed, reads there return 0 bytes.
    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.file.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let position = position.ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "invalid seek to a negative position")
        })?;
        self.position = position;
        Ok(position)
    }

    /// Reads at most `buf.len()` bytes, waiting until they are available, or until at least one is
    /// when responsive. Returns 0 at the end of the file.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.file.length.saturating_sub(self.position);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let wanted = remaining.min(buf.len() as u64);
        let offset = self.file.offset + self.position;
        self.transfer
            .set_window(self.id, offset, self.readahead.max(wanted).min(remaining));
        loop {
            let available = self.transfer.available(offset, wanted);
            if available == wanted || (self.responsive && available > 0) {
                let available = available as usize;
                self.transfer
                    .read_at(offset, &mut buf[..available])
                    .await
                    .map_err(io::Error::other)?;
                self.position += available as u64;
                return Ok(available);
            }
            tokio::select! {
                changed = self.changes.changed() => {
                    if changed.is_err() {
                        return Err(ErrorKind::Interrupted.into());
                    }
                }
                _ = self.transfer.cancellation().cancelled() => {
                    return Err(io::Error::new(ErrorKind::Interrupted, "transfer closed"));
                }
            }
        }
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        self.transfer.remove_window(self.id);
    }
}
