//! Forwarding configuration model
//!
//! Turns terse forward expressions such as `8080`, `localhost:8080~80,443@blog`
//! or `xxx.onion:80~8000` into resolved, validated [`Forward`]s.
//!
//! A forward always has exactly one onion side:
//!
//! - **export**: a local TCP or UNIX socket backend published as an onion service
//! - **import**: a remote onion service made reachable on a local listener

mod doc;
mod endpoint;
mod error;
mod forward;

pub use doc::{EndpointDoc, ForwardDoc};
pub use endpoint::{is_onion_host, Endpoint, DEFAULT_LOCAL_HOST, DEFAULT_ONION_PORT};
pub use error::{ConfigError, Result};
pub use forward::Forward;
