mod config;
mod connection;
mod driver;
mod listener;
mod metadata;
mod piece;
mod pieces;
mod reader;
mod requests;
mod session;
mod storage;
pub(crate) mod transfer;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::Sha1;
use crate::magnet::Magnet;
use crate::torrent::Torrent;

pub use config::Config;
pub use reader::FileReader;
pub use transfer::Transfer;

/// Registry of every transfer in the process. Transfers live until shutdown.
pub struct Swarm {
    config: Arc<Config>,
    transfers: Mutex<HashMap<Sha1, Arc<Transfer>>>,
    cancellation_token: CancellationToken,
}

impl Swarm {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            transfers: Mutex::new(HashMap::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn transfers_mut(&self) -> MutexGuard<'_, HashMap<Sha1, Arc<Transfer>>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a transfer, or returns the existing one for the same info hash. The flag tells
    /// whether it was new.
    fn add(
        &self,
        info_hash: Sha1,
        display_name: Option<String>,
        trackers: Vec<Url>,
    ) -> (Arc<Transfer>, bool) {
        let mut transfers = self.transfers_mut();
        if let Some(existing) = transfers.get(&info_hash) {
            existing.add_trackers(&trackers);
            return (existing.clone(), false);
        }
        let (peers_tx, peers_rx) = mpsc::channel(self.config.channel_buffer);
        let transfer = Arc::new(Transfer::new(
            self.config.clone(),
            info_hash,
            display_name,
            trackers,
            peers_tx,
            self.cancellation_token.child_token(),
        ));
        transfers.insert(info_hash, transfer.clone());
        tokio::spawn(driver::run(transfer.clone(), peers_rx));
        info!("added transfer {}", info_hash);
        (transfer, true)
    }

    pub fn add_magnet(&self, magnet: Magnet) -> (Arc<Transfer>, bool) {
        self.add(magnet.info_hash, magnet.display_name, magnet.trackers)
    }

    /// Registers a transfer whose metadata is already known. The data on disk is checked in the
    /// background, `Transfer::got_info` resolves once that is done.
    pub fn add_torrent(&self, torrent: Torrent) -> (Arc<Transfer>, bool) {
        let Torrent { trackers, info } = torrent;
        let (transfer, added) = self.add(info.info_hash, None, trackers);
        if transfer.info().is_none() {
            let transfer = transfer.clone();
            tokio::spawn(async move {
                if let Err(err) = transfer.set_info(info).await {
                    warn!("{}: {}", transfer.name(), err);
                }
            });
        }
        (transfer, added)
    }

    pub async fn add_torrent_file(&self, path: &Path) -> Result<(Arc<Transfer>, bool)> {
        let torrent = Torrent::load(path).await?;
        Ok(self.add_torrent(torrent))
    }

    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.transfers_mut().values().cloned().collect()
    }

    pub fn transfer(&self, info_hash: &Sha1) -> Option<Arc<Transfer>> {
        self.transfers_mut().get(info_hash).cloned()
    }

    /// Starts accepting peer connections, returns the bound address.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("accepting peers on {}", local_addr);
        tokio::spawn(listener::run(self.clone(), listener));
        Ok(local_addr)
    }

    /// Stops the listener, every driver and connection, and wakes blocked readers.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }
}
