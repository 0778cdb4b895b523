use onionpipe_config::ConfigError;
use onionpipe_overlay::OverlayError;
use thiserror::Error;

/// Errors that abort [`crate::ForwardingService::start`]
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("source: {0}")]
    Source(ConfigError),

    #[error("destination: {0}")]
    Destination(ConfigError),

    #[error("failed to listen on local address {address:?}: {source}")]
    Listen {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to create onion dialer: {0}")]
    Dialer(OverlayError),

    #[error("failed to create onion forward for {alias:?}: {source}")]
    Publish { alias: String, source: OverlayError },

    #[error("import forwards not supported in non-anonymous single-hop mode")]
    ImportsNotSupported,

    #[error("forwarding service already started")]
    AlreadyStarted,
}
