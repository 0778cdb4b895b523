//! Key generation and onion identity derivation

use crate::error::{Result, SecretsError};
use data_encoding::BASE32_NOPAD;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

const ONION_VERSION: u8 = 0x03;
const ONION_CHECKSUM_PREFIX: &[u8] = b".onion checksum";

/// Length of the ed25519 keypair encoding kept in the store (seed || public)
pub const SERVICE_KEY_LEN: usize = 64;
/// Length of an ed25519 seed, also accepted when loading a service key
pub const SERVICE_SEED_LEN: usize = 32;
/// Length of an x25519 key
pub const CLIENT_KEY_LEN: usize = 32;

/// Generate a new ed25519 service key, encoded as seed followed by public key
pub fn generate_service_key() -> Zeroizing<Vec<u8>> {
    let signing = SigningKey::generate(&mut OsRng);
    let mut keypair = signing.to_keypair_bytes();
    let bytes = Zeroizing::new(keypair.to_vec());
    keypair.zeroize();
    bytes
}

/// Generate a new x25519 client key pair, returning (public, private)
pub fn generate_client_key() -> (Vec<u8>, Zeroizing<Vec<u8>>) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let mut private = secret.to_bytes();
    let private_bytes = Zeroizing::new(private.to_vec());
    private.zeroize();
    (public.as_bytes().to_vec(), private_bytes)
}

/// The ed25519 seed of a stored service key
pub fn service_key_seed(key: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    if key.len() != SERVICE_KEY_LEN && key.len() != SERVICE_SEED_LEN {
        return Err(SecretsError::InvalidKey(format!(
            "service key must be {} or {} bytes, got {}",
            SERVICE_SEED_LEN,
            SERVICE_KEY_LEN,
            key.len()
        )));
    }
    let mut seed = Zeroizing::new([0u8; 32]);
    seed.copy_from_slice(&key[..SERVICE_SEED_LEN]);
    Ok(seed)
}

/// Public key of a stored service key
pub fn service_public_key(key: &[u8]) -> Result<[u8; 32]> {
    let seed = service_key_seed(key)?;
    let signing = SigningKey::from_bytes(&seed);
    Ok(signing.verifying_key().to_bytes())
}

/// Onion service id (v3 address without the `.onion` suffix) for a public key
pub fn onion_service_id(public_key: &[u8; 32]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(ONION_CHECKSUM_PREFIX);
    hasher.update(public_key);
    hasher.update([ONION_VERSION]);
    let checksum = hasher.finalize();

    let mut raw = Vec::with_capacity(35);
    raw.extend_from_slice(public_key);
    raw.extend_from_slice(&checksum[..2]);
    raw.push(ONION_VERSION);
    BASE32_NOPAD.encode(&raw).to_lowercase()
}

/// Lowercase unpadded base32, the form client identities are shared in
pub fn encode_identity(key: &[u8]) -> String {
    BASE32_NOPAD.encode(key).to_lowercase()
}

/// Decode a base32 client key, accepting either case
pub fn decode_identity(s: &str) -> Option<Vec<u8>> {
    BASE32_NOPAD.decode(s.to_uppercase().as_bytes()).ok()
}
