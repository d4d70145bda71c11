use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, bail};
use futures::SinkExt;
use log::{debug, info};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::codec::{WriteTo, read_within};
use crate::message::{Handshake, Message, MessageCodec};
use crate::swarm::session::Session;
use crate::swarm::transfer::{PeerSource, Transfer};

/// Piece messages carry at most one block, anything bigger than this is a broken peer.
const MAX_MESSAGE_LENGTH: usize = 1024 * 1024;

impl PeerSource {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Self::Outgoing(addr) => *addr,
            Self::Incoming(_, addr, _) => *addr,
        }
    }
}

/// Runs a peer connection until the peer goes away, misbehaves or the transfer shuts down.
pub async fn run(transfer: Arc<Transfer>, source: PeerSource) -> Result<()> {
    let config = transfer.config();
    let handshake = Handshake::new(transfer.info_hash, config.client_id);
    let (socket, addr, handshake_got) = match source {
        PeerSource::Outgoing(addr) => {
            debug!("connecting to {}...", addr);
            let mut socket = timeout(config.connect_timeout, TcpStream::connect(addr)).await??;
            handshake.write_to(&mut socket).await?;
            let handshake_got: Handshake = read_within(&mut socket, config.connect_timeout).await?;
            (socket, addr, handshake_got)
        }
        PeerSource::Incoming(mut socket, addr, handshake_got) => {
            info!("accepted connection from {}", addr);
            handshake.write_to(&mut socket).await?;
            (socket, addr, handshake_got)
        }
    };
    check_handshake(&handshake, &handshake_got)?;
    info!("[{}] connected to {}", addr, transfer.name());

    let mut session = Session::new(transfer.clone(), addr, handshake_got.supports_extensions());
    let mut messages = Framed::new(socket, MessageCodec::new(MAX_MESSAGE_LENGTH));
    send(&mut messages, session.start()).await?;

    let mut changes = transfer.subscribe();
    let mut keep_alive = interval(config.keep_alive_interval);
    keep_alive.tick().await;
    let mut sweep = interval(config.sweep_interval);
    let cancellation_token = transfer.cancellation().clone();

    loop {
        let outgoing = tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!("[{}] shutting down...", addr);
                break;
            }
            _ = keep_alive.tick() => vec![Message::KeepAlive],
            now = sweep.tick() => {
                session.sweep(now)?;
                Vec::new()
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                session.changed()
            }
            message = messages.next() => match message {
                Some(Ok(message)) => {
                    debug!("[{}] < got {:?}", addr, message);
                    session.handle(message).await?
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    info!("[{}] socket closed", addr);
                    break;
                }
            },
        };
        send(&mut messages, outgoing).await?;
    }

    messages.flush().await?;
    Ok(())
}

fn check_handshake(ours: &Handshake, theirs: &Handshake) -> Result<()> {
    if !theirs.is_standard_protocol() {
        bail!("invalid handshake protocol: {}", theirs.protocol);
    }
    if ours.info_hash != theirs.info_hash {
        bail!("info hash mismatch");
    }
    if ours.peer_id == theirs.peer_id {
        bail!("connected to self");
    }
    Ok(())
}

async fn send(messages: &mut Framed<TcpStream, MessageCodec>, outgoing: Vec<Message>) -> Result<()> {
    if outgoing.is_empty() {
        return Ok(());
    }
    for message in outgoing {
        debug!("> sending {:?}", message);
        messages.feed(message).await?;
    }
    messages.flush().await?;
    Ok(())
}
