use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};

use crate::codec::read_within;
use crate::message::Handshake;
use crate::swarm::Swarm;

/// Accepts incoming peer connections and hands them to the transfer named in their handshake.
pub async fn run(swarm: Arc<Swarm>, listener: TcpListener) {
    let cancellation_token = swarm.cancellation_token.clone();
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let swarm = swarm.clone();
                    tokio::spawn(async move {
                        if let Err(err) = route(&swarm, stream, addr).await {
                            debug!("[{}] dropping incoming connection: {}", addr, err);
                        }
                    });
                }
                Err(err) => warn!("failed to accept peer connection: {}", err),
            },
        }
    }
    info!("peer listener stopped");
}

async fn route(swarm: &Swarm, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
    let handshake: Handshake = read_within(&mut stream, swarm.config.connect_timeout).await?;
    let transfer = swarm
        .transfer(&handshake.info_hash)
        .ok_or_else(|| anyhow!("unknown info hash {}", handshake.info_hash))?;
    transfer.add_incoming(stream, addr, handshake).await;
    Ok(())
}
