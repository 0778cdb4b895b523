use onionpipe_overlay::ClientAuth;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9051";
pub const DEFAULT_SOCKS_ADDR: &str = "127.0.0.1:9050";

/// How to authenticate to the Tor control port
#[derive(Clone, Default)]
pub enum ControlAuth {
    /// No authentication configured on the control port
    #[default]
    Null,
    /// `HashedControlPassword`
    Password(String),
    /// `CookieAuthentication`, reading the cookie from this file
    Cookie(PathBuf),
}

impl fmt::Debug for ControlAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAuth::Null => f.write_str("Null"),
            ControlAuth::Password(_) => f.write_str("Password(..)"),
            ControlAuth::Cookie(path) => f.debug_tuple("Cookie").field(path).finish(),
        }
    }
}

/// Connection settings for an already running Tor daemon
#[derive(Debug, Clone)]
pub struct TorConfig {
    /// Control port address
    pub control_addr: String,
    /// SOCKS port address
    pub socks_addr: String,
    pub auth: ControlAuth,
    /// Credentials registered for remote services requiring client auth
    pub client_auths: Vec<ClientAuth>,
    /// Log control port traffic
    pub debug: bool,
}

impl Default for TorConfig {
    fn default() -> Self {
        TorConfig {
            control_addr: DEFAULT_CONTROL_ADDR.to_string(),
            socks_addr: DEFAULT_SOCKS_ADDR.to_string(),
            auth: ControlAuth::Null,
            client_auths: Vec::new(),
            debug: false,
        }
    }
}
