use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, ToSocketAddrs};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Bind address used when a local endpoint does not name a host
pub const DEFAULT_LOCAL_HOST: &str = "127.0.0.1";

/// Remote port published when an onion endpoint does not name any
pub const DEFAULT_ONION_PORT: u16 = 80;

const ONION_SUFFIX: &str = ".onion";

/// Returns whether the host is a `.onion` address
pub fn is_onion_host(host: &str) -> bool {
    host.ends_with(ONION_SUFFIX)
}

/// One side of a forward.
///
/// The source is the "backend" providing the service being forwarded; the
/// destination is the "frontend" where it is forwarded to, or published.
/// An endpoint is parsed first and resolved second; resolution decides whether
/// it is a local TCP address, a local UNIX socket, or an onion address.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub(crate) host: String,
    pub(crate) ports: Vec<u16>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) alias: Option<String>,

    pub(crate) dest: bool,
    pub(crate) onion: bool,
    pub(crate) resolved: bool,

    pub(crate) service_key: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("ports", &self.ports)
            .field("path", &self.path)
            .field("alias", &self.alias)
            .field("dest", &self.dest)
            .field("onion", &self.onion)
            .field("resolved", &self.resolved)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Endpoint {
    /// Parse an endpoint expression.
    ///
    /// Accepted forms, in priority order:
    /// 1. `PORT[,PORT...]`
    /// 2. the path of an existing UNIX socket
    /// 3. `PORTS@alias` or `HOST:PORTS@alias` (onion destinations only)
    /// 4. `HOST:PORT[,PORT...]`
    pub fn parse(s: &str, dest: bool) -> Result<Self> {
        if s.is_empty() {
            return Err(ConfigError::MissingValue);
        }

        if is_port_list(s) {
            return Ok(Endpoint {
                ports: parse_port_list(s)?,
                dest,
                ..Default::default()
            });
        }

        match fs::metadata(s) {
            Ok(_) => {
                return Ok(Endpoint {
                    path: Some(PathBuf::from(s)),
                    dest,
                    ..Default::default()
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if s.starts_with('/') {
                    return Err(ConfigError::SocketNotFound(PathBuf::from(s)));
                }
            }
            Err(e) => {
                return Err(ConfigError::Stat {
                    path: PathBuf::from(s),
                    source: e,
                })
            }
        }

        if let Some((addr, alias)) = s.rsplit_once('@') {
            if alias.is_empty() {
                return Err(ConfigError::InvalidEndpoint(s.to_string()));
            }
            if addr.is_empty() || !dest {
                return Err(ConfigError::AliasNotAllowed);
            }
            let mut endpoint = Self::parse_network(addr, dest)?;
            if !endpoint.host.is_empty() && !is_onion_host(&endpoint.host) {
                return Err(ConfigError::AliasNotAllowed);
            }
            endpoint.alias = Some(alias.to_string());
            return Ok(endpoint);
        }

        Self::parse_network(s, dest)
    }

    fn parse_network(s: &str, dest: bool) -> Result<Self> {
        if is_port_list(s) {
            return Ok(Endpoint {
                ports: parse_port_list(s)?,
                dest,
                ..Default::default()
            });
        }
        let (host, ports) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidEndpoint(s.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        Ok(Endpoint {
            host: host.to_string(),
            ports: parse_port_list(ports)?,
            dest,
            ..Default::default()
        })
    }

    /// Validate the endpoint and resolve it to a concrete address.
    ///
    /// `as_onion` disambiguates an endpoint whose host does not say what it
    /// is, such as a bare port list. UNIX socket paths are checked for
    /// existence; local hostnames are resolved to an IPv4 address with the
    /// system resolver. Resolving an already resolved endpoint does nothing.
    pub fn resolve(&mut self, as_onion: bool) -> Result<()> {
        if self.resolved {
            return Ok(());
        }

        if self.ports.contains(&0) {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }

        let onion_host = is_onion_host(&self.host);
        if as_onion || onion_host {
            if self.ports.is_empty() {
                self.ports = vec![DEFAULT_ONION_PORT];
            }
            if self.path.is_some() {
                return Err(ConfigError::InvalidOnionEndpoint);
            }
            if self.dest && !self.host.is_empty() {
                return Err(ConfigError::OnionDestinationHost);
            }
            if !self.dest && self.host.is_empty() {
                return Err(ConfigError::OnionSourceRequired);
            }

            if onion_host {
                if self.ports.len() != 1 {
                    return Err(ConfigError::OnionSourcePorts);
                }
            } else if !self.dest {
                return Err(ConfigError::InvalidOnionAddress);
            }
            self.onion = true;
            self.resolved = true;
            return Ok(());
        }

        if self.alias.is_some() {
            return Err(ConfigError::AliasNotAllowed);
        }

        if let Some(path) = &self.path {
            if !self.host.is_empty() || !self.ports.is_empty() {
                return Err(ConfigError::AmbiguousEndpoint);
            }
            let meta = fs::metadata(path).map_err(|e| ConfigError::Stat {
                path: path.clone(),
                source: e,
            })?;
            if !meta.file_type().is_socket() {
                return Err(ConfigError::NotASocket(path.clone()));
            }
            self.resolved = true;
            return Ok(());
        }

        if self.ports.len() != 1 {
            return Err(ConfigError::MultiplePorts);
        }
        if self.host.is_empty() {
            self.host = DEFAULT_LOCAL_HOST.to_string();
        } else {
            self.host = resolve_ipv4(&self.host, self.ports[0])?.to_string();
        }
        self.resolved = true;
        Ok(())
    }

    /// The single address this endpoint binds or dials: `host:port` or a
    /// socket path. Onion destinations and multi-port endpoints have none.
    pub fn single_addr(&self) -> Result<String> {
        if self.onion && self.dest {
            return Err(ConfigError::OnionDestination);
        }
        match self.ports.len() {
            0 => {
                if let Some(path) = &self.path {
                    return Ok(path.display().to_string());
                }
            }
            1 => {
                if !self.host.is_empty() {
                    return Ok(format!("{}:{}", self.host, self.ports[0]));
                }
            }
            _ => return Err(ConfigError::NotSingleAddress),
        }
        Err(ConfigError::Unresolved)
    }

    /// Human readable form of the endpoint.
    ///
    /// For a published destination, `remote_onions` maps alias (empty for the
    /// anonymous service) to the onion service id, once known.
    pub fn description(&self, remote_onions: &HashMap<String, String>) -> String {
        if self.onion && self.dest {
            let ports = join_ports(&self.ports);
            return match remote_onions.get(self.alias_key()) {
                Some(id) => format!("{}{}:{}", id, ONION_SUFFIX, ports),
                None => match &self.alias {
                    Some(alias) => format!("{}@{}", ports, alias),
                    None => ports,
                },
            };
        }
        match self.single_addr() {
            Ok(addr) => addr,
            Err(e) => format!("<invalid endpoint: {}>", e),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Alias used to group publications; the anonymous service is `""`.
    pub fn alias_key(&self) -> &str {
        self.alias.as_deref().unwrap_or("")
    }

    pub fn is_dest(&self) -> bool {
        self.dest
    }

    pub fn is_onion(&self) -> bool {
        self.onion
    }

    pub fn is_unix(&self) -> bool {
        self.path.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Service id of an onion source, without the `.onion` suffix
    pub fn onion_id(&self) -> Option<&str> {
        if self.onion && !self.dest {
            self.host.strip_suffix(ONION_SUFFIX)
        } else {
            None
        }
    }

    /// Attach the persistent service key backing this endpoint's alias
    pub fn set_service_key(&mut self, key: Zeroizing<Vec<u8>>) {
        self.service_key = Some(key);
    }

    pub fn service_key(&self) -> Option<&[u8]> {
        self.service_key.as_ref().map(|k| k.as_slice())
    }

    /// Remove the service key from the endpoint, leaving ownership (and the
    /// zeroize-on-drop) with the caller.
    pub fn take_service_key(&mut self) -> Option<Zeroizing<Vec<u8>>> {
        self.service_key.take()
    }
}

pub(crate) fn is_port_list(s: &str) -> bool {
    !s.is_empty()
        && s
            .split(',')
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    s.split(',')
        .map(|p| match p.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort(p.to_string())),
        })
        .collect()
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn resolve_ipv4(host: &str, port: u16) -> Result<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::LookupFailed {
            host: host.to_string(),
            source: e,
        })?;
    for addr in addrs {
        if let std::net::SocketAddr::V4(v4) = addr {
            tracing::debug!(host = %host, ip = %v4.ip(), "Resolved local host");
            return Ok(*v4.ip());
        }
    }
    Err(ConfigError::Unresolvable(host.to_string()))
}
