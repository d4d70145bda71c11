use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Result, bail};
use bit_set::BitSet;
use log::{debug, info, trace, warn};
use tokio::time::Instant;

use crate::core::Sha1;
use crate::message::{
    Block, BlockData, EXTENDED_HANDSHAKE_ID, ExtendedHandshake, Message, MetadataMessage,
    UT_METADATA_ID,
};
use crate::swarm::metadata::{MAX_METADATA_SIZE, MetadataAssembler, metadata_piece};
use crate::swarm::piece::PieceDownload;
use crate::swarm::requests::Requests;
use crate::swarm::transfer::Transfer;
use crate::torrent::Info;

/// Largest block a peer may ask for.
const MAX_REQUEST_LENGTH: usize = 128 * 1024;

const CLIENT_NAME: &str = concat!("torrent-gateway/", env!("CARGO_PKG_VERSION"));

/// Protocol state of one peer connection. Turns incoming messages and transfer changes into the
/// messages to send back, the connection task only moves bytes.
pub struct Session {
    transfer: Arc<Transfer>,
    addr: SocketAddr,
    peer_choking: bool,
    peer_interested: bool,
    am_choking: bool,
    am_interested: bool,
    peer_has: BitSet,
    /// Pieces this peer has been told about.
    announced: BitSet,
    extensions: bool,
    peer_ut_metadata: Option<u8>,
    metadata: Option<MetadataAssembler>,
    download: Option<PieceDownload>,
    requests: Requests,
    last_activity: Instant,
}

impl Session {
    pub fn new(transfer: Arc<Transfer>, addr: SocketAddr, extensions: bool) -> Self {
        let requests = Requests::new(transfer.config().block_timeout);
        Self {
            transfer,
            addr,
            peer_choking: true,
            peer_interested: false,
            am_choking: true,
            am_interested: false,
            peer_has: BitSet::new(),
            announced: BitSet::new(),
            extensions,
            peer_ut_metadata: None,
            metadata: None,
            download: None,
            requests,
            last_activity: Instant::now(),
        }
    }

    /// Messages sent right after the handshake.
    pub fn start(&mut self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if self.extensions {
            let handshake = ExtendedHandshake {
                ut_metadata: Some(UT_METADATA_ID),
                metadata_size: self.transfer.info().map(|info| info.as_bytes().len()),
                client: Some(CLIENT_NAME.to_string()),
            };
            messages.push(Message::Extended(EXTENDED_HANDSHAKE_ID, handshake.to_bytes()));
        }
        if let Some(have) = self.transfer.bitfield() {
            if !have.is_empty() {
                self.announced = have.clone();
                messages.push(Message::Bitfield(have));
            }
        }
        messages
    }

    pub async fn handle(&mut self, message: Message) -> Result<Vec<Message>> {
        trace!("[{}] handling {:?}", self.addr, message);
        self.last_activity = Instant::now();
        let mut messages = Vec::new();
        match message {
            Message::KeepAlive | Message::Cancel(_) | Message::Port(_) => (),
            Message::Choke => {
                self.peer_choking = true;
                self.abandon_piece();
            }
            Message::Unchoke => {
                self.peer_choking = false;
                self.fill_requests(&mut messages);
            }
            Message::Interested => {
                self.peer_interested = true;
                if self.am_choking && self.transfer.config().upload {
                    self.am_choking = false;
                    messages.push(Message::Unchoke);
                }
            }
            Message::NotInterested => self.peer_interested = false,
            Message::Have(piece) => {
                if piece >= self.piece_limit() {
                    bail!("have for piece {} out of range", piece);
                }
                self.peer_has.insert(piece);
                self.update_interest(&mut messages);
                self.fill_requests(&mut messages);
            }
            Message::Bitfield(pieces) => {
                let mut bits = pieces.into_bit_vec();
                bits.truncate(self.piece_limit());
                self.peer_has = BitSet::from_bit_vec(bits);
                self.update_interest(&mut messages);
                self.fill_requests(&mut messages);
            }
            Message::Request(block) => {
                if let Some(message) = self.upload(block).await {
                    messages.push(message);
                }
            }
            Message::Piece(block_data) => {
                self.block_received(block_data).await?;
                self.fill_requests(&mut messages);
            }
            Message::Extended(EXTENDED_HANDSHAKE_ID, payload) => {
                let handshake = ExtendedHandshake::from_bytes(&payload)?;
                self.extended_handshake(handshake, &mut messages);
            }
            Message::Extended(UT_METADATA_ID, payload) => {
                let message = MetadataMessage::from_bytes(&payload)?;
                self.metadata_message(message, &mut messages).await;
            }
            Message::Extended(id, _) => debug!("[{}] ignoring extended message {}", self.addr, id),
        }
        Ok(messages)
    }

    /// Called whenever the transfer changed: new pieces, new metadata or new reader priorities.
    pub fn changed(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(have) = self.transfer.bitfield() {
            for piece in have.iter() {
                if self.announced.insert(piece) {
                    messages.push(Message::Have(piece));
                }
            }
        }
        self.update_interest(&mut messages);
        self.fill_requests(&mut messages);
        messages
    }

    /// Fails if the peer went quiet or let a request stall. Dropping the session hands its piece
    /// back to the other connections.
    pub fn sweep(&self, now: Instant) -> Result<()> {
        let idle_timeout = self.transfer.config().idle_peer_timeout;
        if now.saturating_duration_since(self.last_activity) > idle_timeout {
            bail!("idle for more than {:?}", idle_timeout);
        }
        if let Some(block) = self.requests.expired(now) {
            bail!("request timed out: {:?}", block);
        }
        Ok(())
    }

    /// Highest piece count a peer may refer to. Before the metadata arrives it is bounded by the
    /// largest info dictionary we accept.
    fn piece_limit(&self) -> usize {
        match self.transfer.info() {
            Some(info) => info.total_pieces(),
            None => MAX_METADATA_SIZE / Sha1::SIZE,
        }
    }

    fn update_interest(&mut self, messages: &mut Vec<Message>) {
        let interested = self.transfer.wants_from(&self.peer_has);
        if interested != self.am_interested {
            self.am_interested = interested;
            messages.push(if interested {
                Message::Interested
            } else {
                Message::NotInterested
            });
        }
    }

    fn fill_requests(&mut self, messages: &mut Vec<Message>) {
        if self.peer_choking {
            return;
        }
        let config = self.transfer.config();
        let now = Instant::now();
        while self.requests.len() < config.max_requests_per_peer {
            if self.download.is_none() {
                match self.transfer.pick_piece(&self.peer_has) {
                    Some((piece, size)) => {
                        debug!("[{}] downloading piece {}", self.addr, piece);
                        self.download =
                            Some(PieceDownload::new(piece, size, config.block_size_bytes()));
                    }
                    None => break,
                }
            }
            let Some(block) = self.download.as_mut().and_then(PieceDownload::next_request)
            else {
                break;
            };
            self.requests.requested(block, now);
            messages.push(Message::Request(block));
        }
    }

    fn abandon_piece(&mut self) {
        self.requests.clear();
        if let Some(download) = self.download.take() {
            self.transfer.release_piece(download.piece);
        }
    }

    async fn block_received(&mut self, block_data: BlockData) -> Result<()> {
        if !self.requests.received(&block_data.block()) {
            debug!("[{}] unexpected block {:?}", self.addr, block_data.block());
            return Ok(());
        }
        let complete = match &mut self.download {
            Some(download) if download.piece == block_data.piece => download.add(block_data),
            _ => false,
        };
        if complete {
            if let Some(download) = self.download.take() {
                let piece = download.piece;
                if !self.transfer.piece_downloaded(piece, download.into_data()).await? {
                    warn!("[{}] sent corrupt data for piece {}", self.addr, piece);
                }
            }
        }
        Ok(())
    }

    async fn upload(&self, block: Block) -> Option<Message> {
        if self.am_choking || !self.peer_interested || block.length > MAX_REQUEST_LENGTH {
            return None;
        }
        match self.transfer.read_block(&block).await {
            Ok(data) => Some(Message::Piece(BlockData {
                piece: block.piece,
                offset: block.offset,
                data,
            })),
            Err(err) => {
                warn!("[{}] unable to serve {:?}: {}", self.addr, block, err);
                None
            }
        }
    }

    fn extended_handshake(&mut self, handshake: ExtendedHandshake, messages: &mut Vec<Message>) {
        debug!("[{}] extended handshake {:?}", self.addr, handshake);
        self.peer_ut_metadata = handshake.ut_metadata;
        let (Some(id), Some(size)) = (handshake.ut_metadata, handshake.metadata_size) else {
            return;
        };
        if self.transfer.info().is_some() || self.metadata.is_some() {
            return;
        }
        match MetadataAssembler::new(size) {
            Ok(mut assembler) => {
                while let Some(piece) = assembler.next_request() {
                    let request = MetadataMessage::Request(piece);
                    messages.push(Message::Extended(id, request.to_bytes()));
                }
                self.metadata = Some(assembler);
            }
            Err(err) => warn!("[{}] {}", self.addr, err),
        }
    }

    async fn metadata_message(&mut self, message: MetadataMessage, messages: &mut Vec<Message>) {
        match message {
            MetadataMessage::Request(piece) => {
                let Some(id) = self.peer_ut_metadata else {
                    return;
                };
                let response = match self.transfer.info() {
                    Some(info) => match metadata_piece(info.as_bytes(), piece) {
                        Some(data) => MetadataMessage::Data {
                            piece,
                            total_size: info.as_bytes().len(),
                            data: data.to_vec(),
                        },
                        None => MetadataMessage::Reject(piece),
                    },
                    None => MetadataMessage::Reject(piece),
                };
                messages.push(Message::Extended(id, response.to_bytes()));
            }
            MetadataMessage::Data {
                piece,
                total_size,
                data,
            } => {
                let Some(assembler) = &mut self.metadata else {
                    return;
                };
                match assembler.add(piece, total_size, data) {
                    Ok(false) => (),
                    Ok(true) => {
                        if let Some(assembler) = self.metadata.take() {
                            self.metadata_complete(assembler.into_bytes()).await;
                        }
                    }
                    Err(err) => {
                        warn!("[{}] {}", self.addr, err);
                        self.metadata = None;
                    }
                }
            }
            MetadataMessage::Reject(piece) => {
                debug!("[{}] rejected metadata piece {}", self.addr, piece);
                self.metadata = None;
            }
        }
    }

    async fn metadata_complete(&mut self, raw: Vec<u8>) {
        if Sha1::digest(&raw) != self.transfer.info_hash {
            warn!("[{}] sent metadata with the wrong hash", self.addr);
            return;
        }
        let result = match Info::from_bytes(raw) {
            Ok(info) => self.transfer.set_info(info).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(true) => info!("[{}] got metadata for {}", self.addr, self.transfer.name()),
            Ok(false) => (),
            Err(err) => warn!("[{}] unusable metadata: {}", self.addr, err),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(download) = self.download.take() {
            self.transfer.release_piece(download.piece);
        }
    }
}
