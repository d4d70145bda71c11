use std::net::SocketAddr;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use anyhow::{Result, anyhow, bail};
use bit_set::BitSet;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio::sync::{OnceCell, mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::Sha1;
use crate::message::{Block, Handshake};
use crate::swarm::config::Config;
use crate::swarm::pieces::{Pieces, ReaderId};
use crate::swarm::reader::FileReader;
use crate::swarm::storage::Storage;
use crate::torrent::{FileEntry, Info, Torrent};

/// Where a new peer connection comes from.
#[derive(Debug)]
pub enum PeerSource {
    Outgoing(SocketAddr),
    /// Accepted by the listener, the remote handshake has already been read.
    Incoming(TcpStream, SocketAddr, Handshake),
}

/// Everything that only exists once the info dictionary is known.
#[derive(Debug)]
struct State {
    info: Info,
    files: Vec<FileEntry>,
    storage: Storage,
    pieces: Mutex<Pieces>,
}

/// A torrent known to the swarm, with or without its metadata. Shared between peer connections,
/// file readers and the HTTP handlers.
#[derive(Debug)]
pub struct Transfer {
    pub info_hash: Sha1,
    pub added_at: SystemTime,
    display_name: Option<String>,
    trackers: Mutex<Vec<Url>>,
    config: Arc<Config>,
    state: OnceCell<State>,
    download_all: AtomicBool,
    changes: watch::Sender<u64>,
    peers: mpsc::Sender<PeerSource>,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
    next_reader: AtomicU64,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transfer {
    pub(super) fn new(
        config: Arc<Config>,
        info_hash: Sha1,
        display_name: Option<String>,
        trackers: Vec<Url>,
        peers: mpsc::Sender<PeerSource>,
        cancel: CancellationToken,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            info_hash,
            added_at: SystemTime::now(),
            display_name,
            trackers: Mutex::new(trackers),
            config,
            state: OnceCell::new(),
            download_all: AtomicBool::new(false),
            changes,
            peers,
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            next_reader: AtomicU64::new(0),
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Torrent name once known, otherwise the magnet display name, otherwise the hex info hash.
    pub fn name(&self) -> String {
        match (self.info(), &self.display_name) {
            (Some(info), _) => info.name().to_string(),
            (None, Some(name)) => name.clone(),
            (None, None) => self.info_hash.to_hex(),
        }
    }

    pub fn info(&self) -> Option<&Info> {
        self.state.get().map(|state| &state.info)
    }

    /// Waits until the info dictionary is known. Returns `None` if the transfer is shut down first.
    pub async fn got_info(&self) -> Option<&Info> {
        let mut changes = self.changes.subscribe();
        loop {
            if let Some(info) = self.info() {
                return Some(info);
            }
            tokio::select! {
                _ = changes.changed() => (),
                _ = self.cancel.cancelled() => return None,
            }
        }
    }

    /// Installs the info dictionary, checking it against the info hash and whatever data is
    /// already on disk. Returns false if it was already known.
    pub async fn set_info(&self, info: Info) -> Result<bool> {
        if info.info_hash != self.info_hash {
            bail!("info hash mismatch: got {}", info.info_hash);
        }
        if self.state.initialized() {
            return Ok(false);
        }
        let storage = Storage::new(self.config.storage_dir.join(self.info_hash.to_hex()), &info);
        let have = storage.verify(&info).await;
        let mut pieces = Pieces::new(&info, have);
        if self.download_all.load(Ordering::Relaxed) {
            pieces.download_all();
        }
        let state = State {
            files: info.files(),
            storage,
            pieces: Mutex::new(pieces),
            info,
        };
        if self.state.set(state).is_err() {
            return Ok(false);
        }
        info!(
            "{}: got metadata, {} of {} bytes on disk",
            self.name(),
            self.bytes_completed(),
            self.length().unwrap_or_default()
        );
        self.notify();
        Ok(true)
    }

    pub fn trackers(&self) -> Vec<Url> {
        lock(&self.trackers).clone()
    }

    pub fn add_trackers(&self, trackers: &[Url]) {
        let mut known = lock(&self.trackers);
        for tracker in trackers {
            if !known.contains(tracker) {
                known.push(tracker.clone());
            }
        }
    }

    /// A metainfo document for this transfer, once the info dictionary is known.
    pub fn metainfo(&self) -> Option<Torrent> {
        self.info().map(|info| Torrent {
            trackers: self.trackers(),
            info: info.clone(),
        })
    }

    /// Files in torrent order, empty until the info dictionary is known.
    pub fn files(&self) -> &[FileEntry] {
        self.state
            .get()
            .map(|state| state.files.as_slice())
            .unwrap_or_default()
    }

    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files().iter().find(|file| file.path == path)
    }

    pub fn length(&self) -> Option<u64> {
        self.info().map(Info::total_size)
    }

    pub fn bytes_completed(&self) -> u64 {
        self.pieces()
            .map(|pieces| pieces.completed_bytes())
            .unwrap_or_default()
    }

    /// Bytes still missing, if known.
    pub fn left(&self) -> Option<u64> {
        self.length()
            .map(|length| length.saturating_sub(self.bytes_completed()))
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Asks for every piece, not only those readers are waiting for.
    pub fn download_all(&self) {
        self.download_all.store(true, Ordering::Relaxed);
        let changed = self
            .pieces()
            .map(|mut pieces| pieces.download_all())
            .unwrap_or(false);
        if changed {
            self.notify();
        }
    }

    pub fn reader(self: &Arc<Self>, file: &FileEntry) -> FileReader {
        FileReader::new(self.clone(), file.clone())
    }

    pub(crate) fn next_reader_id(&self) -> ReaderId {
        self.next_reader.fetch_add(1, Ordering::Relaxed)
    }

    /// Bumped whenever something a connection or reader may be waiting on changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn pieces(&self) -> Option<MutexGuard<'_, Pieces>> {
        self.state.get().map(|state| lock(&state.pieces))
    }

    /// Prioritises the pieces covering `window` for reader `id`.
    pub(crate) fn set_window(&self, id: ReaderId, offset: u64, readahead: u64) {
        let Some(info) = self.info() else {
            return;
        };
        let total = info.total_size();
        if offset >= total {
            self.remove_window(id);
            return;
        }
        let end = (offset + readahead.max(1)).min(total);
        let window = Range {
            start: info.piece_at(offset),
            end: info.piece_at(end - 1) + 1,
        };
        let changed = self
            .pieces()
            .map(|mut pieces| pieces.set_window(id, window))
            .unwrap_or(false);
        if changed {
            self.notify();
        }
    }

    pub(crate) fn remove_window(&self, id: ReaderId) {
        let changed = self
            .pieces()
            .map(|mut pieces| pieces.remove_window(id))
            .unwrap_or(false);
        if changed {
            self.notify();
        }
    }

    /// Contiguous verified bytes at `offset`, at most `max`.
    pub(crate) fn available(&self, offset: u64, max: u64) -> u64 {
        self.pieces()
            .map(|pieces| pieces.available(offset, max))
            .unwrap_or_default()
    }

    pub fn has_piece(&self, piece: usize) -> bool {
        self.pieces().is_some_and(|pieces| pieces.has(piece))
    }

    pub fn is_complete(&self) -> bool {
        self.pieces().is_some_and(|pieces| pieces.is_complete())
    }

    pub fn bitfield(&self) -> Option<BitSet> {
        self.pieces().map(|pieces| pieces.bitfield())
    }

    pub fn wants_from(&self, peer_has: &BitSet) -> bool {
        self.pieces()
            .is_some_and(|pieces| pieces.wants_from(peer_has))
    }

    /// Claims the next piece to download from a peer, with its size.
    pub fn pick_piece(&self, peer_has: &BitSet) -> Option<(usize, usize)> {
        let info = self.info()?;
        let piece = self.pieces()?.pick(peer_has)?;
        Some((piece, info.piece_size(piece)))
    }

    pub fn release_piece(&self, piece: usize) {
        if let Some(mut pieces) = self.pieces() {
            pieces.release(piece);
        }
        self.notify();
    }

    /// Checks a downloaded piece against its hash and stores it. Returns false if the data was
    /// corrupt, the piece is then up for grabs again.
    pub async fn piece_downloaded(&self, piece: usize, data: Vec<u8>) -> Result<bool> {
        let state = self.state.get().ok_or_else(|| anyhow!("metadata unknown"))?;
        let expected = state
            .info
            .pieces
            .get(piece)
            .ok_or_else(|| anyhow!("invalid piece {}", piece))?;
        if Sha1::digest(&data) != *expected {
            warn!("{}: piece {} sha1 mismatch", self.name(), piece);
            self.release_piece(piece);
            return Ok(false);
        }
        if let Err(err) = state
            .storage
            .write_at(state.info.piece_offset(piece), &data)
            .await
        {
            self.release_piece(piece);
            return Err(err.into());
        }
        self.downloaded.fetch_add(data.len() as u64, Ordering::Relaxed);
        let completed = lock(&state.pieces).complete(piece);
        if completed && self.is_complete() {
            info!("{}: download complete", self.name());
        }
        self.notify();
        Ok(true)
    }

    /// Reads part of a verified piece from disk.
    pub async fn read_block(&self, block: &Block) -> Result<Vec<u8>> {
        let state = self.state.get().ok_or_else(|| anyhow!("metadata unknown"))?;
        let piece_size = state.info.piece_size(block.piece);
        if !self.has_piece(block.piece) || block.end() > piece_size {
            bail!("invalid request {:?}", block);
        }
        let mut data = vec![0; block.length];
        let offset = state.info.piece_offset(block.piece) + block.offset as u64;
        state.storage.read_at(offset, &mut data).await?;
        self.uploaded.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data)
    }

    /// Reads `buf.len()` bytes that are known to be available.
    pub(crate) async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.state.get().ok_or_else(|| anyhow!("metadata unknown"))?;
        state.storage.read_at(offset, buf).await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn add_peer(&self, addr: SocketAddr) {
        if self.peers.send(PeerSource::Outgoing(addr)).await.is_err() {
            warn!("{}: not accepting peers", self.name());
        }
    }

    pub(crate) async fn add_incoming(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        handshake: Handshake,
    ) {
        let source = PeerSource::Incoming(stream, addr, handshake);
        if self.peers.send(source).await.is_err() {
            warn!("{}: not accepting peers", self.name());
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
