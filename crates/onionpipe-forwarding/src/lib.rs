//! Forwarding service
//!
//! Bridges local endpoints and onion services through an [`Overlay`]:
//!
//! - **imports** listen locally and relay each accepted connection to a
//!   remote onion service dialed through the overlay
//! - **exports** publish local TCP or UNIX socket backends as onion services,
//!   one service per alias
//!
//! All relays share one cancellation token; [`ForwardingService::done`] fires
//! once everything has been torn down.
//!
//! [`Overlay`]: onionpipe_overlay::Overlay

mod error;
mod export;
mod import;
pub mod relay;
mod service;

pub use error::ForwardingError;
pub use export::PUBLISH_TIMEOUT;
pub use service::{ForwardingOptions, ForwardingService};
