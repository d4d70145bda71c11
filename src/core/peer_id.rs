use rand::RngCore;

const PREFIX: &[u8; 8] = b"-TG0100-";

/// 20-byte client identifier in Azureus style: a client/version prefix followed by random bytes.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn random() -> Self {
        let mut data = [0; 20];
        data[..PREFIX.len()].copy_from_slice(PREFIX);
        rand::rng().fill_bytes(&mut data[PREFIX.len()..]);
        Self(data)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}
