use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::timeout;
use url::Url;

use crate::tracker::request::{AnnounceRequest, Event};
use crate::tracker::response::{TrackerResponse, compact_peers_v4};

// https://www.bittorrent.org/beps/bep_0015.html

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
const CONNECT_RESPONSE_LEN: usize = 16;
const ANNOUNCE_HEADER_LEN: usize = 20;
const NUM_WANT: i32 = -1;
const UDP_TIMEOUT: Duration = Duration::from_secs(8);

pub async fn announce(url: &Url, request: &AnnounceRequest) -> Result<TrackerResponse> {
    let addr = resolve(url).await?;
    let bind: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;

    let transaction_id = rand::random::<u32>();
    let mut connect = Vec::with_capacity(16);
    connect.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    connect.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
    connect.extend_from_slice(&transaction_id.to_be_bytes());
    let response = exchange(&socket, &connect).await?;
    let body = check_header(&response, ACTION_CONNECT, transaction_id, CONNECT_RESPONSE_LEN)?;
    let connection_id = u64::from_be_bytes(read_array(body, 0)?);

    let transaction_id = rand::random::<u32>();
    let mut announce = Vec::with_capacity(98);
    announce.extend_from_slice(&connection_id.to_be_bytes());
    announce.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    announce.extend_from_slice(&transaction_id.to_be_bytes());
    announce.extend_from_slice(&request.info_hash.0);
    announce.extend_from_slice(&request.peer_id.0);
    announce.extend_from_slice(&request.downloaded.to_be_bytes());
    announce.extend_from_slice(&request.left.to_be_bytes());
    announce.extend_from_slice(&request.uploaded.to_be_bytes());
    announce.extend_from_slice(&Event::code(request.event).to_be_bytes());
    announce.extend_from_slice(&0u32.to_be_bytes()); // IP address
    announce.extend_from_slice(&rand::random::<u32>().to_be_bytes()); // key
    announce.extend_from_slice(&NUM_WANT.to_be_bytes());
    announce.extend_from_slice(&request.port.to_be_bytes());
    let response = exchange(&socket, &announce).await?;
    let body = check_header(&response, ACTION_ANNOUNCE, transaction_id, ANNOUNCE_HEADER_LEN)?;

    let interval = u32::from_be_bytes(read_array(body, 0)?);
    let leechers = u32::from_be_bytes(read_array(body, 4)?);
    let seeders = u32::from_be_bytes(read_array(body, 8)?);
    Ok(TrackerResponse {
        complete: Some(seeders as usize),
        incomplete: Some(leechers as usize),
        interval: Duration::from_secs(interval.into()),
        peers: compact_peers_v4(&body[12..])?,
    })
}

async fn resolve(url: &Url) -> Result<SocketAddr> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("tracker url {} has no host", url))?;
    let port = url
        .port()
        .ok_or_else(|| anyhow!("tracker url {} has no port", url))?;
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| anyhow!("unable to resolve {}", host))
}

async fn exchange(socket: &UdpSocket, packet: &[u8]) -> Result<Vec<u8>> {
    socket.send(packet).await?;
    let mut buf = vec![0; 2048];
    let read = timeout(UDP_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| anyhow!("udp tracker timed out"))??;
    buf.truncate(read);
    Ok(buf)
}

/// Validates action and transaction id, returning the bytes following them.
fn check_header(response: &[u8], action: u32, transaction_id: u32, min_len: usize) -> Result<&[u8]> {
    if response.len() < 8 {
        bail!("udp tracker response too short");
    }
    let got_action = u32::from_be_bytes(read_array(response, 0)?);
    let got_transaction = u32::from_be_bytes(read_array(response, 4)?);
    if got_transaction != transaction_id {
        bail!("udp tracker transaction id mismatch");
    }
    if got_action == ACTION_ERROR {
        bail!(
            "tracker failure: {}",
            String::from_utf8_lossy(&response[8..])
        );
    }
    if got_action != action {
        bail!("unexpected udp tracker action {}", got_action);
    }
    if response.len() < min_len {
        bail!("udp tracker response too short");
    }
    Ok(&response[8..])
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| anyhow!("udp tracker response truncated"))
}
