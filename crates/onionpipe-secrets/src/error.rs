use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("key {0:?} not found")]
    NotFound(String),

    #[error("failed to resolve client key {0:?}")]
    ClientKeyNotResolved(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("don't know where to write secrets")]
    NoLocation,

    #[error("failed to read secrets {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse secrets {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write secrets {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize secrets: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SecretsError>;
