use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::core::{PeerId, Sha1};

#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: Sha1,
    pub peer_id: PeerId,
    /// The port number that the client is listening on. Ports reserved for BitTorrent are
    /// typically 6881-6889. Clients may choose to give up if it cannot establish a port within
    /// this range.
    pub port: u16,
    /// The total amount uploaded (since the client sent the 'started' event to the tracker).
    pub uploaded: u64,
    /// The total amount downloaded (since the client sent the 'started' event to the tracker).
    pub downloaded: u64,
    /// The number of bytes needed to download to be 100% complete and get all the included files
    /// in the torrent.
    pub left: u64,
    pub event: Option<Event>,
}

impl AnnounceRequest {
    /// Builds the HTTP announce URL, keeping whatever query the tracker URL already carries
    /// (private trackers put passkeys there).
    pub fn url(&self, announce: &Url) -> Url {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            url_encode(&self.info_hash.0),
            url_encode(&self.peer_id.0),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );
        if let Some(event) = &self.event {
            query.push_str("&event=");
            query.push_str(event.into());
        }
        let mut url = announce.clone();
        let query = match announce.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
            _ => query,
        };
        url.set_query(Some(&query));
        url
    }
}

fn url_encode(bytes: &[u8]) -> String {
    String::from_iter(byte_serialize(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The first request to the tracker must include the event key with this value.
    Started,
    /// Must be sent to the tracker if the client is shutting down gracefully.
    Stopped,
    /// Must be sent to the tracker when the download completes. However, must not be sent if the
    /// download was already 100% complete when the client started. Presumably, this is to allow
    /// the tracker to increment the "completed downloads" metric based solely on this event.
    Completed,
}

impl From<&Event> for &str {
    fn from(value: &Event) -> Self {
        match value {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::Completed => "completed",
        }
    }
}

impl Event {
    /// Event code used by UDP trackers.
    pub fn code(event: Option<Event>) -> u32 {
        match event {
            None => 0,
            Some(Event::Completed) => 1,
            Some(Event::Started) => 2,
            Some(Event::Stopped) => 3,
        }
    }
}
