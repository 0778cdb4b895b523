//! Secret key store for persistent onion services and client authorization
//!
//! Holds ed25519 keys backing named onion services and x25519 key pairs
//! identifying this host to authenticated onion services. The store is read
//! once, mutated in memory, and written back only when something changed.

mod error;
pub mod keys;
mod store;

pub use error::{Result, SecretsError};
pub use store::{
    default_path, ClientKeyPair, ClientPublic, ClientsPublic, SecretBytes, SecretStore,
    ServicePublic, ServicesPublic, STORE_VERSION,
};
