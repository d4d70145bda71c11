use std::{path::PathBuf, time::Duration};

use size::Size;

use crate::core::PeerId;

#[derive(Clone, Debug)]
pub struct Config {
    pub client_id: PeerId,
    /// Port announced to trackers for incoming peer connections.
    pub port: u16,
    /// Downloads live in `<storage_dir>/<hex info hash>/`.
    pub storage_dir: PathBuf,
    /// Unchoke interested peers and serve their requests.
    pub upload: bool,
    pub max_peers: usize,
    pub max_requests_per_peer: usize,
    pub block_size: Size,
    /// How far past the read position a reader asks for pieces to be prioritised.
    pub readahead: Size,
    pub announce_interval: Duration,
    pub sweep_interval: Duration,
    pub keep_alive_interval: Duration,
    pub connect_timeout: Duration,
    pub block_timeout: Duration,
    pub idle_peer_timeout: Duration,
    pub channel_buffer: usize,
}

impl Config {
    pub fn new(storage_dir: PathBuf) -> Self {
        Self {
            client_id: PeerId::random(),
            port: 42069,
            storage_dir,
            upload: false,
            max_peers: 50,
            max_requests_per_peer: 10,
            block_size: Size::from_kibibytes(16),
            readahead: Size::from_mebibytes(4),
            announce_interval: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            block_timeout: Duration::from_secs(30),
            idle_peer_timeout: Duration::from_secs(180),
            channel_buffer: 16,
        }
    }

    pub fn with_upload(mut self, upload: bool) -> Self {
        self.upload = upload;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn block_size_bytes(&self) -> usize {
        self.block_size.bytes() as usize
    }
}
