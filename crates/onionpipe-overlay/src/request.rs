use crate::{OverlayError, OverlayResult, PortMap};
use std::fmt;
use zeroize::Zeroizing;

/// ed25519 seed of a persistent onion service identity, wiped on drop
#[derive(Clone)]
pub struct ServiceKey(Zeroizing<[u8; 32]>);

impl ServiceKey {
    /// Accepts a 32 byte seed or a 64 byte seed-and-public-key encoding
    pub fn from_bytes(bytes: &[u8]) -> OverlayResult<Self> {
        if bytes.len() != 32 && bytes.len() != 64 {
            return Err(OverlayError::InvalidKey(format!(
                "expected 32 or 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes[..32]);
        Ok(ServiceKey(seed))
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceKey(..)")
    }
}

/// Everything needed to publish one onion service
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub ports: PortMap,
    /// Persistent identity; `None` publishes an ephemeral service
    pub key: Option<ServiceKey>,
    /// Publish as a single-hop, non-anonymous service
    pub non_anonymous: bool,
    /// Base32 x25519 public keys of the only clients allowed to connect
    pub authorized_clients: Vec<String>,
}

/// Credentials for reaching a remote onion service that requires client
/// authorization
#[derive(Clone)]
pub struct ClientAuth {
    pub onion_id: String,
    pub private_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAuth")
            .field("onion_id", &self.onion_id)
            .finish_non_exhaustive()
    }
}
