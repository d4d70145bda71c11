use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Fetches torrents and serves their files over HTTP while they download
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address the HTTP server listens on
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen_address: SocketAddr,

    /// Upload to other peers
    #[arg(long, default_value = "false")]
    pub upload: bool,

    /// Working directory, every other path is relative to it
    #[arg(long, default_value = ".")]
    pub root_dir: PathBuf,

    /// Where downloaded data and torrent records are kept
    #[arg(long, default_value = "torrent")]
    pub storage_dir: PathBuf,

    /// Port for incoming peer connections, 0 disables it
    #[arg(long, default_value_t = 42069)]
    pub peer_port: u16,

    /// Directory served under /static
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["torrent-gateway"]);

        assert_eq!(args.listen_address, "0.0.0.0:8080".parse().unwrap());
        assert!(!args.upload);
        assert_eq!(args.root_dir, PathBuf::from("."));
        assert_eq!(args.storage_dir, PathBuf::from("torrent"));
        assert_eq!(args.peer_port, 42069);
        assert_eq!(args.static_dir, PathBuf::from("static"));
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from([
            "torrent-gateway",
            "--listen-address",
            "127.0.0.1:3000",
            "--upload",
            "--root-dir",
            "/srv",
            "--storage-dir",
            "data",
            "--peer-port",
            "0",
        ]);

        assert_eq!(args.listen_address, "127.0.0.1:3000".parse().unwrap());
        assert!(args.upload);
        assert_eq!(args.root_dir, PathBuf::from("/srv"));
        assert_eq!(args.storage_dir, PathBuf::from("data"));
        assert_eq!(args.peer_port, 0);
    }
}
