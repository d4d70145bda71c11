use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::fs;

use crate::error::{Error, Result};
use crate::magnet::Magnet;
use crate::swarm::{Swarm, Transfer};

const MAGNET_PREFIX: &str = "magnet:";
const RECORD_EXTENSION: &str = "torrent";

/// Adds transfers to the swarm and keeps a `<hex>.torrent` record of each one in the storage
/// directory, so they come back after a restart.
#[derive(Clone)]
pub struct Lifecycle {
    swarm: Arc<Swarm>,
    storage_dir: PathBuf,
}

impl Lifecycle {
    pub fn new(swarm: Arc<Swarm>, storage_dir: PathBuf) -> Self {
        Self { swarm, storage_dir }
    }

    /// Registers a magnet link. Returns as soon as the transfer exists, metadata is fetched,
    /// persisted and the download started in the background.
    pub fn add_magnet(&self, uri: &str) -> Result<Arc<Transfer>> {
        if !uri.starts_with(MAGNET_PREFIX) {
            return Err(Error::InvalidLink("Not a magnet link!".to_string()));
        }
        let magnet: Magnet = uri
            .parse()
            .map_err(|err: anyhow::Error| Error::InvalidLink(format!("{:#}", err)))?;
        let (transfer, added) = self.swarm.add_magnet(magnet);
        if added {
            self.spawn_on_added(transfer.clone());
        }
        Ok(transfer)
    }

    /// Registers a transfer from a persisted record.
    pub async fn add_persisted(&self, path: &Path) -> Result<Arc<Transfer>> {
        let (transfer, added) =
            self.swarm
                .add_torrent_file(path)
                .await
                .map_err(|source| Error::Load {
                    path: path.to_path_buf(),
                    source,
                })?;
        if added {
            self.spawn_on_added(transfer.clone());
        }
        Ok(transfer)
    }

    /// Re-adds every record in the storage directory. Broken records are logged and skipped.
    pub async fn recover(&self) -> io::Result<usize> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.storage_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                records.push(path);
            }
        }
        records.sort();
        let mut recovered = 0;
        for path in records {
            match self.add_persisted(&path).await {
                Ok(transfer) => {
                    info!("recovered {} from {}", transfer.info_hash, path.display());
                    recovered += 1;
                }
                Err(err) => error!("{}", err),
            }
        }
        Ok(recovered)
    }

    pub fn record_path(&self, transfer: &Transfer) -> PathBuf {
        self.storage_dir
            .join(format!("{}.{}", transfer.info_hash, RECORD_EXTENSION))
    }

    fn spawn_on_added(&self, transfer: Arc<Transfer>) {
        let lifecycle = self.clone();
        tokio::spawn(async move { lifecycle.on_added(transfer).await });
    }

    /// Waits for metadata, persists it, then asks for the whole torrent. The record is always
    /// written before the download is requested.
    async fn on_added(&self, transfer: Arc<Transfer>) {
        if transfer.got_info().await.is_none() {
            return;
        }
        if let Err(err) = self.persist(&transfer).await {
            warn!("{}", err);
        }
        info!("{}: downloading", transfer.name());
        transfer.download_all();
    }

    async fn persist(&self, transfer: &Transfer) -> Result<()> {
        let Some(metainfo) = transfer.metainfo() else {
            return Ok(());
        };
        let path = self.record_path(transfer);
        let tmp = path.with_extension(format!("{}.tmp", RECORD_EXTENSION));
        let result = async {
            fs::write(&tmp, metainfo.to_bytes()).await?;
            fs::rename(&tmp, &path).await
        }
        .await;
        result.map_err(|source| Error::Persistence {
            path: path.clone(),
            source,
        })?;
        info!("{}: saved {}", transfer.name(), path.display());
        Ok(())
    }
}

/// Creates the storage directory, readable by the owner only, unless it already exists.
pub fn ensure_storage_dir(path: &Path) -> io::Result<()> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} is not a directory", path.display()),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(path)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::swarm::Config;
    use crate::testing::{TIMEOUT, test_data, test_info, test_torrent};

    fn lifecycle(dir: &Path) -> Lifecycle {
        let swarm = Arc::new(Swarm::new(Config::new(dir.to_path_buf())));
        Lifecycle::new(swarm, dir.to_path_buf())
    }

    #[tokio::test]
    async fn reject_non_magnet_input() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());

        let err = lifecycle.add_magnet("http://example.org").unwrap_err();

        assert_eq!(err.to_string(), "Not a magnet link!");
        assert!(lifecycle.swarm.transfers().is_empty());
    }

    #[tokio::test]
    async fn reject_malformed_magnet() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());

        let err = lifecycle.add_magnet("magnet:?xt=urn:btih:1234").unwrap_err();

        assert!(matches!(err, Error::InvalidLink(_)));
        assert!(lifecycle.swarm.transfers().is_empty());
    }

    fn saved_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_file())
            .collect()
    }

    #[tokio::test]
    async fn adding_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let info = test_info(&test_data(1000), 256);
        let uri = format!("magnet:?xt=urn:btih:{}&dn=ubuntu", info.info_hash);

        let first = lifecycle.add_magnet(&uri).unwrap();
        let second = lifecycle.add_magnet(&uri).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lifecycle.swarm.transfers().len(), 1);
        assert_eq!(first.name(), "ubuntu");

        first.set_info(info).await.unwrap();
        let path = lifecycle.record_path(&first);
        tokio::time::timeout(TIMEOUT, async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let third = lifecycle.add_magnet(&uri).unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(saved_files(dir.path()), vec![path]);
        lifecycle.swarm.shutdown();
    }

    #[tokio::test]
    async fn persisted_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let mut torrent = test_torrent(test_info(&test_data(1000), 256));
        torrent.trackers = vec!["http://tracker.example.org/announce".parse().unwrap()];
        let (transfer, _) = lifecycle.swarm.add_torrent(torrent.clone());
        timeout_info(&transfer).await;

        lifecycle.persist(&transfer).await.unwrap();
        let path = lifecycle.record_path(&transfer);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.torrent", torrent.info.info_hash)
        );
        lifecycle.swarm.shutdown();

        let reloaded = self::lifecycle(dir.path());
        let transfer = reloaded.add_persisted(&path).await.unwrap();
        timeout_info(&transfer).await;
        assert_eq!(transfer.info_hash, torrent.info.info_hash);
        assert_eq!(transfer.files(), torrent.info.files().as_slice());
        assert_eq!(transfer.length(), Some(1000));
        assert_eq!(transfer.trackers(), torrent.trackers);
        reloaded.swarm.shutdown();
    }

    #[tokio::test]
    async fn record_is_written_once_metadata_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let info = test_info(&test_data(1000), 256);
        let uri = format!("magnet:?xt=urn:btih:{}", info.info_hash);
        let transfer = lifecycle.add_magnet(&uri).unwrap();
        let path = lifecycle.record_path(&transfer);
        assert!(!path.exists());

        transfer.set_info(info).await.unwrap();

        tokio::time::timeout(TIMEOUT, async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        lifecycle.swarm.shutdown();
    }

    #[tokio::test]
    async fn recover_skips_broken_records() {
        let dir = tempfile::tempdir().unwrap();
        let torrent = test_torrent(test_info(&test_data(1000), 256));
        let good = dir.path().join(format!("{}.torrent", torrent.info.info_hash));
        std::fs::write(&good, torrent.to_bytes()).unwrap();
        std::fs::write(dir.path().join("broken.torrent"), b"d4:infoi42ee").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let lifecycle = lifecycle(dir.path());

        let recovered = lifecycle.recover().await.unwrap();

        assert_eq!(recovered, 1);
        let transfers = lifecycle.swarm.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].info_hash, torrent.info.info_hash);
        lifecycle.swarm.shutdown();
    }

    #[tokio::test]
    async fn load_error_names_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.torrent");
        let lifecycle = lifecycle(dir.path());

        let err = lifecycle.add_persisted(&path).await.unwrap_err();

        assert!(matches!(err, Error::Load { .. }));
        assert!(err.to_string().contains("missing.torrent"));
    }

    #[test]
    fn storage_dir_is_created_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torrent");

        ensure_storage_dir(&path).unwrap();
        ensure_storage_dir(&path).unwrap();

        assert!(path.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn storage_dir_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torrent");
        std::fs::write(&path, b"").unwrap();

        assert!(ensure_storage_dir(&path).is_err());
    }

    async fn timeout_info(transfer: &Transfer) {
        tokio::time::timeout(TIMEOUT, transfer.got_info())
            .await
            .unwrap()
            .unwrap();
    }
}
