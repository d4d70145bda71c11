mod hash;
mod peer_id;

pub use hash::Sha1;
pub use peer_id::PeerId;
