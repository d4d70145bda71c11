//! The HTTP side: the listing page with its add form, file downloads and static assets.

mod content;
mod index;
mod page;
mod range;

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::lifecycle::Lifecycle;
use crate::swarm::Swarm;

#[derive(Clone)]
pub struct AppState {
    pub swarm: Arc<Swarm>,
    pub lifecycle: Lifecycle,
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index::list).post(index::add))
        .route("/torrent/{hash}/{*path}", get(content::download))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
}

/// Serves until `shutdown` resolves. Open downloads are cut short when the swarm shuts down.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use bit_set::BitSet;
    use reqwest::StatusCode;
    use reqwest::header::{
        ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
        IF_MODIFIED_SINCE, LAST_MODIFIED, RANGE,
    };
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    use super::*;
    use crate::magnet::Magnet;
    use crate::swarm::{Config, Transfer};
    use crate::testing::{TIMEOUT, test_data, test_info, test_torrent};

    const HASH: &str = "c47d187067c6cf953245f128b5fde62a3b8fa3b0";

    struct TestServer {
        addr: SocketAddr,
        swarm: Arc<Swarm>,
        client: reqwest::Client,
        _dir: tempfile::TempDir,
    }

    impl TestServer {
        async fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let storage_dir = dir.path().join("torrent");
            let static_dir = dir.path().join("static");
            std::fs::create_dir_all(&static_dir).unwrap();
            std::fs::write(static_dir.join("style.css"), "body {}").unwrap();
            let swarm = Arc::new(Swarm::new(Config::new(storage_dir.clone())));
            let lifecycle = Lifecycle::new(swarm.clone(), storage_dir);
            let state = AppState {
                swarm: swarm.clone(),
                lifecycle,
            };
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(serve(
                listener,
                router(state, &static_dir),
                std::future::pending(),
            ));
            let client = reqwest::Client::builder()
                .cookie_store(true)
                .build()
                .unwrap();
            Self {
                addr,
                swarm,
                client,
                _dir: dir,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        async fn get(&self, path: &str) -> reqwest::Response {
            self.client.get(self.url(path)).send().await.unwrap()
        }

        async fn add_magnet(&self, magnet: &str) -> reqwest::Response {
            self.client
                .post(self.url("/"))
                .form(&[("magnet", magnet)])
                .send()
                .await
                .unwrap()
        }

        /// Adds a transfer whose data is already complete in storage.
        async fn seed(&self, data: &[u8]) -> Arc<Transfer> {
            let torrent = test_torrent(test_info(data, 256));
            let root = self
                .swarm
                .config()
                .storage_dir
                .join(torrent.info.info_hash.to_hex());
            std::fs::create_dir_all(&root).unwrap();
            std::fs::write(root.join("file.bin"), data).unwrap();
            let (transfer, _) = self.swarm.add_torrent(torrent);
            timeout(TIMEOUT, transfer.got_info()).await.unwrap().unwrap();
            assert!(transfer.is_complete());
            transfer
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.swarm.shutdown();
        }
    }

    #[tokio::test]
    async fn serve_whole_file() {
        let server = TestServer::start().await;
        let data = test_data(1000);
        let transfer = server.seed(&data).await;

        let response = server
            .get(&format!("/torrent/{}/file.bin", transfer.info_hash))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_LENGTH], "1000");
        assert_eq!(headers[ACCEPT_RANGES], "bytes");
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(headers[CONTENT_DISPOSITION], "attachment; filename=\"file.bin\"");
        assert!(headers.contains_key(LAST_MODIFIED));
        assert_eq!(response.bytes().await.unwrap(), data);
    }

    #[tokio::test]
    async fn serve_byte_range() {
        let server = TestServer::start().await;
        let data = test_data(1000);
        let transfer = server.seed(&data).await;
        let path = format!("/torrent/{}/file.bin", transfer.info_hash);

        let response = server
            .client
            .get(server.url(&path))
            .header(RANGE, "bytes=100-199")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 100-199/1000");
        assert_eq!(response.headers()[CONTENT_LENGTH], "100");
        assert_eq!(response.bytes().await.unwrap(), &data[100..200]);

        let response = server
            .client
            .get(server.url(&path))
            .header(RANGE, "bytes=-10")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.bytes().await.unwrap(), &data[990..]);

        let response = server
            .client
            .get(server.url(&path))
            .header(RANGE, "bytes=1000-")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */1000");
    }

    #[tokio::test]
    async fn not_modified_since_added() {
        let server = TestServer::start().await;
        let transfer = server.seed(&test_data(1000)).await;
        let path = format!("/torrent/{}/file.bin", transfer.info_hash);
        let last_modified = server.get(&path).await.headers()[LAST_MODIFIED].clone();

        let response = server
            .client
            .get(server.url(&path))
            .header(IF_MODIFIED_SINCE, last_modified)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_waits_for_missing_pieces() {
        let server = TestServer::start().await;
        let data = test_data(1000);
        let info = test_info(&data, 256);
        let uri = format!("magnet:?xt=urn:btih:{}", info.info_hash);
        let transfer = server.swarm.add_magnet(uri.parse().unwrap()).0;
        transfer.set_info(info.clone()).await.unwrap();
        let url = server.url(&format!("/torrent/{}/file.bin", info.info_hash));

        let request = server.client.get(url).header(RANGE, "bytes=300-399").send();
        let pending = tokio::spawn(async move { request.await.unwrap().bytes().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pending.is_finished());

        assert!(transfer.piece_downloaded(1, data[256..512].to_vec()).await.unwrap());

        let body = timeout(TIMEOUT, pending).await.unwrap().unwrap();
        assert_eq!(body, &data[300..400]);
    }

    /// Next piece a peer with everything would be asked for, without keeping the claim.
    fn wanted(transfer: &Transfer, peer_has: &BitSet) -> Option<(usize, usize)> {
        let picked = transfer.pick_piece(peer_has);
        if let Some((piece, _)) = picked {
            transfer.release_piece(piece);
        }
        picked
    }

    #[tokio::test]
    async fn disconnect_drops_reader_priority() {
        let server = TestServer::start().await;
        let data = test_data(1000);
        let info = test_info(&data, 256);
        let uri = format!("magnet:?xt=urn:btih:{}", info.info_hash);
        let transfer = server.swarm.add_magnet(uri.parse().unwrap()).0;
        transfer.set_info(info.clone()).await.unwrap();
        let everything: BitSet = (0..info.total_pieces()).collect();
        assert_eq!(wanted(&transfer, &everything), None);

        let mut socket = tokio::net::TcpStream::connect(server.addr).await.unwrap();
        let request = format!(
            "GET /torrent/{}/file.bin HTTP/1.1\r\nHost: {}\r\nRange: bytes=300-399\r\n\r\n",
            info.info_hash, server.addr
        );
        socket.write_all(request.as_bytes()).await.unwrap();

        timeout(TIMEOUT, async {
            while wanted(&transfer, &everything) != Some((1, 256)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        drop(socket);

        timeout(TIMEOUT, async {
            while wanted(&transfer, &everything).is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_content_is_not_found() {
        let server = TestServer::start().await;
        let transfer = server.seed(&test_data(1000)).await;
        server
            .swarm
            .add_magnet(format!("magnet:?xt=urn:btih:{}", HASH).parse().unwrap());

        for path in [
            "/torrent/not-hex/file.bin".to_string(),
            format!("/torrent/{}/file.bin", "ab".repeat(20)),
            format!("/torrent/{}/other.bin", transfer.info_hash),
            format!("/torrent/{}/file.bin", HASH),
            "/nothing/here".to_string(),
            "/static/missing.css".to_string(),
        ] {
            let response = server.get(&path).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
            assert!(response.bytes().await.unwrap().is_empty(), "{}", path);
        }
    }

    #[tokio::test]
    async fn static_files() {
        let server = TestServer::start().await;

        let response = server.get("/static/style.css").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "body {}");
    }

    #[tokio::test]
    async fn flash_is_shown_once() {
        let server = TestServer::start().await;

        let page = server.add_magnet("http://example.org").await;
        assert_eq!(page.status(), StatusCode::OK);
        let page = page.text().await.unwrap();
        assert!(page.contains("<p class=\"flash error\">Not a magnet link!</p>"));
        assert!(server.swarm.transfers().is_empty());

        let page = server.get("/").await.text().await.unwrap();
        assert!(!page.contains("class=\"flash"));
    }

    #[tokio::test]
    async fn add_redirects_to_listing() {
        let server = TestServer::start().await;
        let uri = format!("magnet:?xt=urn:btih:{}&dn=ubuntu", HASH);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        let response = client
            .post(server.url("/"))
            .form(&[("magnet", uri.as_str())])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[reqwest::header::LOCATION], "/");
        let cookie = response.headers()[reqwest::header::SET_COOKIE]
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("flash=info:"));

        let page = server.add_magnet(&uri).await.text().await.unwrap();
        assert!(page.contains("Added ubuntu"));
        assert_eq!(page.matches("<h2>ubuntu</h2>").count(), 1);
        assert_eq!(server.swarm.transfers().len(), 1);
    }

    #[tokio::test]
    async fn empty_magnet_does_nothing() {
        let server = TestServer::start().await;

        let page = server.add_magnet("").await.text().await.unwrap();

        assert!(!page.contains("class=\"flash"));
        assert!(server.swarm.transfers().is_empty());
    }

    #[tokio::test]
    async fn unparseable_form_is_an_error() {
        let server = TestServer::start().await;

        let response = server
            .client
            .post(server.url("/"))
            .body("magnet=x")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn listing_is_sorted_by_name() {
        let server = TestServer::start().await;
        for (name, hash) in [("b", "1"), ("A", "2"), ("c", "3")] {
            let magnet: Magnet = format!("magnet:?xt=urn:btih:{}&dn={}", hash.repeat(40), name)
                .parse()
                .unwrap();
            server.swarm.add_magnet(magnet);
        }

        let page = server.get("/").await.text().await.unwrap();

        let position = |name: &str| page.find(&format!("<h2>{}</h2>", name)).unwrap();
        assert!(position("A") < position("b"));
        assert!(position("b") < position("c"));
        assert_eq!(page.matches("<p class=\"progress\">0%</p>").count(), 3);
    }

    #[tokio::test]
    async fn listing_links_files() {
        let server = TestServer::start().await;
        let transfer = server.seed(&test_data(1000)).await;

        let page = server.get("/").await.text().await.unwrap();

        assert!(page.contains(&format!(
            "<a href=\"/torrent/{}/file.bin\">file.bin</a>",
            transfer.info_hash
        )));
        assert!(page.contains("100.000%"));
    }
}
