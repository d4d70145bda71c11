use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{interval, timeout};
use url::Url;

use crate::swarm::connection;
use crate::swarm::transfer::{PeerSource, Transfer};
use crate::tracker::{self, AnnounceRequest, Event, TrackerResponse};

/// Announced as `left` while the torrent size is not known yet.
const UNKNOWN_LEFT: u64 = 16 * 1024;
const STOPPED_TIMEOUT: Duration = Duration::from_secs(2);

/// Drives a single transfer: announces to its trackers and keeps up to `max_peers` connections
/// busy with candidates from trackers, the listener and explicitly added peers.
pub async fn run(transfer: Arc<Transfer>, mut peers: mpsc::Receiver<PeerSource>) {
    let config = transfer.config();
    let client = reqwest::Client::new();
    let cancellation_token = transfer.cancellation().clone();
    let mut announce_timer = interval(config.announce_interval);
    let mut announces: JoinSet<(Url, Result<TrackerResponse>)> = JoinSet::new();
    let mut connections: JoinSet<()> = JoinSet::new();
    let mut connected = Connected::default();
    let mut candidates: VecDeque<SocketAddr> = VecDeque::new();
    let mut event = Some(Event::Started);
    let mut completed_announced = transfer.is_complete();

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = announce_timer.tick() => {
                if !completed_announced && transfer.is_complete() {
                    completed_announced = true;
                    event = event.or(Some(Event::Completed));
                }
                let request = announce_request(&transfer, event.take());
                for tracker in transfer.trackers() {
                    let client = client.clone();
                    let request = request.clone();
                    announces.spawn(async move {
                        let response = tracker::announce(&client, &tracker, &request).await;
                        (tracker, response)
                    });
                }
            }
            Some(result) = announces.join_next() => match result {
                Ok((tracker, Ok(response))) => {
                    debug!("{}: {} peers from {}", transfer.name(), response.peers.len(), tracker);
                    for addr in response.peers {
                        if !connected.contains(&addr) && !candidates.contains(&addr) {
                            candidates.push_back(addr);
                        }
                    }
                }
                Ok((tracker, Err(err))) => warn!("{}: announce to {} failed: {}", transfer.name(), tracker, err),
                Err(err) => warn!("{}: announce task failed: {}", transfer.name(), err),
            },
            Some(source) = peers.recv() => match source {
                PeerSource::Outgoing(addr) => {
                    if !connected.contains(&addr) && !candidates.contains(&addr) {
                        candidates.push_front(addr);
                    }
                }
                incoming => {
                    let addr = incoming.addr();
                    if connected.len() < config.max_peers && !connected.contains(&addr) {
                        connect(&transfer, incoming, &mut connections, &mut connected);
                    } else {
                        debug!("{}: refusing connection from {}", transfer.name(), addr);
                    }
                }
            },
            Some(result) = connections.join_next_with_id() => {
                connected.finished(result);
            }
        }
        while connected.len() < config.max_peers {
            let Some(addr) = candidates.pop_front() else {
                break;
            };
            if !connected.contains(&addr) {
                connect(&transfer, PeerSource::Outgoing(addr), &mut connections, &mut connected);
            }
        }
    }

    announces.shutdown().await;
    connections.shutdown().await;
    announce_stopped(&transfer, &client).await;
    info!("{}: stopped", transfer.name());
}

/// Addresses of running connection tasks, keyed by task so a panicking task frees its slot too.
#[derive(Default)]
struct Connected {
    tasks: HashMap<Id, SocketAddr>,
}

impl Connected {
    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn contains(&self, addr: &SocketAddr) -> bool {
        self.tasks.values().any(|connected| connected == addr)
    }

    /// Frees the slot of a finished task, whether it returned or panicked.
    fn finished(&mut self, result: Result<(Id, ()), JoinError>) -> Option<SocketAddr> {
        let id = match result {
            Ok((id, ())) => id,
            Err(err) => {
                warn!("connection task failed: {}", err);
                err.id()
            }
        };
        self.tasks.remove(&id)
    }
}

fn connect(
    transfer: &Arc<Transfer>,
    source: PeerSource,
    connections: &mut JoinSet<()>,
    connected: &mut Connected,
) {
    let addr = source.addr();
    let transfer = transfer.clone();
    let handle = connections.spawn(async move {
        if let Err(err) = connection::run(transfer, source).await {
            debug!("[{}] disconnected: {}", addr, err);
        }
    });
    connected.tasks.insert(handle.id(), addr);
}

fn announce_request(transfer: &Transfer, event: Option<Event>) -> AnnounceRequest {
    let config = transfer.config();
    AnnounceRequest {
        info_hash: transfer.info_hash,
        peer_id: config.client_id,
        port: config.port,
        uploaded: transfer.uploaded(),
        downloaded: transfer.downloaded(),
        left: transfer.left().unwrap_or(UNKNOWN_LEFT),
        event,
    }
}

async fn announce_stopped(transfer: &Transfer, client: &reqwest::Client) {
    let trackers = transfer.trackers();
    if trackers.is_empty() {
        return;
    }
    let request = announce_request(transfer, Some(Event::Stopped));
    let announces = trackers
        .iter()
        .map(|tracker| tracker::announce(client, tracker, &request));
    if timeout(STOPPED_TIMEOUT, join_all(announces)).await.is_err() {
        debug!("{}: trackers did not acknowledge stop", transfer.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_connection_frees_its_slot() {
        let mut connections = JoinSet::new();
        let mut connected = Connected::default();
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let handle = connections.spawn(async { panic!("connection blew up") });
        connected.tasks.insert(handle.id(), addr);
        assert!(connected.contains(&addr));

        let result = connections.join_next_with_id().await.unwrap();

        assert!(result.is_err());
        assert_eq!(connected.finished(result), Some(addr));
        assert_eq!(connected.len(), 0);
        assert!(!connected.contains(&addr));
    }
}
