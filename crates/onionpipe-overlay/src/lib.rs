//! Boundary to the onion overlay network
//!
//! The forwarding service only ever talks to the overlay through these
//! traits: it asks for a [`Dialer`] to reach remote onion services and
//! publishes local backends with [`Overlay::publish`].
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │          onionpipe-forwarding          │
//! │     import relays    export relays     │
//! └────────────────────────────────────────┘
//!          │ Dialer::dial       │ Overlay::publish
//!          ↓                    ↓
//! ┌────────────────────────────────────────┐
//! │      onionpipe-overlay (this crate)    │
//! └────────────────────────────────────────┘
//!                    │ implemented by
//!                    ↓
//!            onionpipe-tor, test overlays
//! ```

mod ports;
mod request;

pub use ports::{PortMap, UNIX_PREFIX};
pub use request::{ClientAuth, PublishRequest, ServiceKey};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Overlay-level errors
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control port error: {0}")]
    Control(String),

    #[error("{command} rejected: {code} {message}")]
    Rejected {
        command: String,
        code: u16,
        message: String,
    },

    #[error("SOCKS error: {0}")]
    Socks(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out")]
    Timeout,

    #[error("overlay closed")]
    Closed,
}

/// Result type for overlay operations
pub type OverlayResult<T> = Result<T, OverlayError>;

/// A byte stream to or from the overlay
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type OverlayStream = Box<dyn AsyncStream>;

/// Handle to a running overlay network client
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Create a dialer for remote onion services. Dials attempted after
    /// `cancel` fires fail with [`OverlayError::Cancelled`].
    async fn dialer(&self, cancel: CancellationToken) -> OverlayResult<Arc<dyn Dialer>>;

    /// Publish local backends as one onion service and wait until it is
    /// reachable.
    async fn publish(&self, request: PublishRequest) -> OverlayResult<Box<dyn Publication>>;

    /// Release the overlay handle. Publications should be closed first.
    async fn close(&self) -> OverlayResult<()>;
}

/// Opens streams to remote onion services
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `addr`, an `<id>.onion:<port>` address
    async fn dial(&self, addr: &str) -> OverlayResult<OverlayStream>;
}

/// A published onion service
#[async_trait]
pub trait Publication: Send + Sync {
    /// Service id, the onion address without the `.onion` suffix
    fn service_id(&self) -> &str;

    /// Withdraw the service. Closing more than once is a no-op.
    async fn close(&mut self) -> OverlayResult<()>;
}
