use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Error, Result, anyhow, bail};

use crate::bencoding::Value;

#[derive(Debug, PartialEq)]
pub struct TrackerResponse {
    pub complete: Option<usize>,
    pub incomplete: Option<usize>,
    pub interval: Duration,
    pub peers: Vec<SocketAddr>,
}

impl TryFrom<Value> for TrackerResponse {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        if let Some(reason) = value.try_remove_entry("failure reason")? {
            let reason: String = reason.try_into()?;
            bail!("tracker failure: {}", reason);
        }
        let complete = value.try_remove_entry("complete")?.map(usize::try_from).transpose()?;
        let incomplete = value
            .try_remove_entry("incomplete")?
            .map(usize::try_from)
            .transpose()?;
        let interval = value.remove_entry("interval")?.try_into()?;
        let mut peers = match value.try_remove_entry("peers")? {
            Some(Value::String(compact)) => compact_peers_v4(&compact)?,
            Some(Value::List(peers)) => {
                let mut result = Vec::with_capacity(peers.len());
                for peer in peers {
                    result.push(peer_from_dictionary(peer)?);
                }
                result
            }
            Some(_) => bail!("unexpected peers format"),
            None => Vec::new(),
        };
        if let Some(compact) = value.try_remove_entry("peers6")? {
            let compact: Vec<u8> = compact.try_into()?;
            peers.extend(compact_peers_v6(&compact)?);
        }
        Ok(TrackerResponse {
            complete,
            incomplete,
            interval,
            peers,
        })
    }
}

fn peer_from_dictionary(mut value: Value) -> Result<SocketAddr> {
    let port = value.remove_entry("port")?.try_into()?;
    let ip: String = value.remove_entry("ip")?.try_into()?;
    let ip: IpAddr = ip.parse()?;
    Ok(SocketAddr::new(ip, port))
}

/// The peers string holds 6 bytes per peer: the IPv4 address followed by the port, both in
/// network byte order.
pub fn compact_peers_v4(bytes: &[u8]) -> Result<Vec<SocketAddr>> {
    if bytes.len() % 6 != 0 {
        return Err(anyhow!("compact peers length {} is not a multiple of 6", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::from((ip, port))
        })
        .collect())
}

fn compact_peers_v6(bytes: &[u8]) -> Result<Vec<SocketAddr>> {
    if bytes.len() % 18 != 0 {
        return Err(anyhow!("compact peers6 length {} is not a multiple of 18", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(18)
        .map(|chunk| {
            let mut octets = [0; 16];
            octets.copy_from_slice(&chunk[..16]);
            let port = u16::from_be_bytes([chunk[16], chunk[17]]);
            SocketAddr::from((Ipv6Addr::from(octets), port))
        })
        .collect())
}
