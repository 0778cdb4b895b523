use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while parsing or resolving endpoints and forwards
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing value")]
    MissingValue,

    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("UNIX socket does not exist: {}", .0.display())]
    SocketNotFound(PathBuf),

    #[error("failed to inspect {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("only remote onions can be aliased")]
    AliasNotAllowed,

    #[error("invalid onion endpoint")]
    InvalidOnionEndpoint,

    #[error("onion addresses may only be specified as source")]
    OnionDestinationHost,

    #[error("onion source requires an onion address")]
    OnionSourceRequired,

    #[error("onion source address may only specify a single port")]
    OnionSourcePorts,

    #[error("invalid onion address")]
    InvalidOnionAddress,

    #[error("ambiguous endpoint: must be either a UNIX socket or TCP address")]
    AmbiguousEndpoint,

    #[error("not a UNIX socket: {}", .0.display())]
    NotASocket(PathBuf),

    #[error("local network address may only specify a single port")]
    MultiplePorts,

    #[error("could not resolve {host:?}: {source}")]
    LookupFailed {
        host: String,
        source: std::io::Error,
    },

    #[error("could not resolve {0:?}")]
    Unresolvable(String),

    #[error("onion destination")]
    OnionDestination,

    #[error("endpoint does not represent a single address")]
    NotSingleAddress,

    #[error("unresolved endpoint")]
    Unresolved,

    #[error("invalid forward {0:?}")]
    InvalidForward(String),

    #[error("forward source: {0}")]
    ForwardSource(Box<ConfigError>),

    #[error("forward destination: {0}")]
    ForwardDestination(Box<ConfigError>),

    #[error("source or destination must be an onion address")]
    OnionRequired,
}

impl ConfigError {
    pub(crate) fn source_side(err: ConfigError) -> Self {
        ConfigError::ForwardSource(Box::new(err))
    }

    pub(crate) fn destination_side(err: ConfigError) -> Self {
        ConfigError::ForwardDestination(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
