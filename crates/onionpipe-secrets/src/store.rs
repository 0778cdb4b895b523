//! Secret store persisted as a single JSON document
//!
//! Mutations go through `&mut self`; callers sharing a store across tasks
//! wrap it in a mutex.

use crate::error::{Result, SecretsError};
use crate::keys;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub const STORE_VERSION: &str = "1";

/// Default location of the secrets file under the user data directory
pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("onionpipe").join("secrets.json"))
}

/// Key bytes that are wiped from memory when dropped
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        SecretBytes(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// A separately owned copy, wiped when the copy is dropped
    pub fn to_zeroizing(&self) -> Zeroizing<Vec<u8>> {
        self.0.clone()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes>)", self.0.len())
    }
}

impl Serialize for SecretBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(BASE64.encode(self.0.as_slice()));
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for SecretBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        BASE64
            .decode(encoded.as_bytes())
            .map(|bytes| SecretBytes(Zeroizing::new(bytes)))
            .map_err(serde::de::Error::custom)
    }
}

/// x25519 key pair authorizing this host to a protected onion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKeyPair {
    #[serde(with = "base64_bytes")]
    pub public: Vec<u8>,
    pub private: SecretBytes,
}

/// Public view of a stored service key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePublic {
    pub address: String,
}

/// Public view of a stored client key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientPublic {
    pub identity: String,
}

pub type ServicesPublic = BTreeMap<String, ServicePublic>;
pub type ClientsPublic = BTreeMap<String, ClientPublic>;

/// Named service and client keys, loaded from and written back to one file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretStore {
    version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    service_keys: BTreeMap<String, SecretBytes>,
    #[serde(default, deserialize_with = "null_as_default")]
    client_keys: BTreeMap<String, ClientKeyPair>,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for SecretStore {
    fn default() -> Self {
        SecretStore {
            version: STORE_VERSION.to_string(),
            service_keys: BTreeMap::new(),
            client_keys: BTreeMap::new(),
            dirty: false,
            path: None,
        }
    }
}

impl SecretStore {
    /// Load the store at `path`. A missing file yields an empty store that
    /// will be written to `path` once something is added.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read(path) {
            Ok(contents) => Zeroizing::new(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No secrets file, starting empty");
                return Ok(SecretStore {
                    path: Some(path.to_path_buf()),
                    ..Default::default()
                });
            }
            Err(source) => {
                return Err(SecretsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut store: SecretStore = serde_json::from_slice(&contents).map_err(|source| {
            SecretsError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        if store.version.is_empty() {
            store.version = STORE_VERSION.to_string();
        }
        store.path = Some(path.to_path_buf());
        debug!(
            path = %path.display(),
            services = store.service_keys.len(),
            clients = store.client_keys.len(),
            "Loaded secrets"
        );
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether there are changes not yet written
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_service_key(&self, name: &str) -> bool {
        self.service_keys.contains_key(name)
    }

    pub fn has_client_key(&self, name: &str) -> bool {
        self.client_keys.contains_key(name)
    }

    /// Return the service key for `name`, generating one if absent
    pub fn ensure_service_key(&mut self, name: &str) -> Zeroizing<Vec<u8>> {
        if let Some(key) = self.service_keys.get(name) {
            return key.to_zeroizing();
        }
        let key = keys::generate_service_key();
        self.service_keys
            .insert(name.to_string(), SecretBytes::new(key.clone()));
        self.dirty = true;
        debug!(name = %name, "Generated service key");
        key
    }

    /// Service key for `name`, if stored
    pub fn service_key(&self, name: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.service_keys.get(name).map(SecretBytes::to_zeroizing)
    }

    pub fn remove_service_key(&mut self, name: &str) -> Result<()> {
        if self.service_keys.remove(name).is_none() {
            return Err(SecretsError::NotFound(name.to_string()));
        }
        self.dirty = true;
        Ok(())
    }

    /// Onion addresses of all stored service keys, by name
    pub fn services_public(&self) -> ServicesPublic {
        let mut public = ServicesPublic::new();
        for (name, key) in &self.service_keys {
            match keys::service_public_key(key.expose()) {
                Ok(public_key) => {
                    let address = format!("{}.onion", keys::onion_service_id(&public_key));
                    public.insert(name.clone(), ServicePublic { address });
                }
                Err(e) => warn!(name = %name, error = %e, "Skipping malformed service key"),
            }
        }
        public
    }

    /// Return the client key pair for `name`, generating one if absent
    pub fn ensure_client_key(&mut self, name: &str) -> ClientKeyPair {
        if let Some(pair) = self.client_keys.get(name) {
            return pair.clone();
        }
        let (public, private) = keys::generate_client_key();
        let pair = ClientKeyPair {
            public,
            private: SecretBytes::new(private),
        };
        self.client_keys.insert(name.to_string(), pair.clone());
        self.dirty = true;
        debug!(name = %name, "Generated client key");
        pair
    }

    pub fn client_key(&self, name: &str) -> Option<&ClientKeyPair> {
        self.client_keys.get(name)
    }

    pub fn remove_client_key(&mut self, name: &str) -> Result<()> {
        if self.client_keys.remove(name).is_none() {
            return Err(SecretsError::NotFound(name.to_string()));
        }
        self.dirty = true;
        Ok(())
    }

    /// Base32 identities of all stored client keys, by name
    pub fn clients_public(&self) -> ClientsPublic {
        self.client_keys
            .iter()
            .map(|(name, pair)| {
                (
                    name.clone(),
                    ClientPublic {
                        identity: keys::encode_identity(&pair.public),
                    },
                )
            })
            .collect()
    }

    /// Private client key from either a base32 key literal or a stored name
    pub fn resolve_client_private_key(&self, name_or_key: &str) -> Result<Zeroizing<Vec<u8>>> {
        if let Some(decoded) = keys::decode_identity(name_or_key) {
            let decoded = Zeroizing::new(decoded);
            if decoded.len() == keys::CLIENT_KEY_LEN {
                return Ok(decoded);
            }
        }
        match self.client_keys.get(name_or_key) {
            Some(pair) => Ok(pair.private.to_zeroizing()),
            None => Err(SecretsError::ClientKeyNotResolved(name_or_key.to_string())),
        }
    }

    /// Write the store back to where it was loaded from, if it changed
    pub fn write_file(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let path = self.path.clone().ok_or(SecretsError::NoLocation)?;
        self.write_to(&path)?;
        self.dirty = false;
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let write_error = |source: std::io::Error| SecretsError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent).map_err(write_error)?;
        }

        let contents = Zeroizing::new(serde_json::to_vec_pretty(self)?);
        let tmp_path = path.with_extension("json.tmp");
        write_private_file(&tmp_path, &contents).map_err(write_error)?;
        fs::rename(&tmp_path, path).map_err(write_error)?;

        debug!(path = %path.display(), "Wrote secrets");
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Serialize public key bytes as standard base64
mod base64_bytes {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
