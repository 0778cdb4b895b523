use crate::endpoint::{is_onion_host, is_port_list, Endpoint};
use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::str::FromStr;

const SEPARATOR: char = '~';

/// A relay from a source endpoint to a destination endpoint.
///
/// Exactly one side is an onion address once resolved: an onion source makes
/// an import, an onion destination an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    src: Endpoint,
    dest: Endpoint,
}

impl Forward {
    /// Build a forward from parsed endpoints, resolving it
    pub fn new(src: Endpoint, dest: Endpoint) -> Result<Self> {
        let mut fwd = Forward { src, dest };
        fwd.resolve()?;
        Ok(fwd)
    }

    /// Parse `SOURCE~DEST`, or a single expression used for both sides
    /// (`8080` publishes local port 8080 as onion port 8080).
    pub fn parse(s: &str) -> Result<Self> {
        let (src_expr, dest_expr) = match s.split_once(SEPARATOR) {
            Some((_, dest)) if dest.contains(SEPARATOR) => {
                return Err(ConfigError::InvalidForward(s.to_string()));
            }
            Some((src, dest)) => (src, dest),
            None => (strip_alias(s), s),
        };
        let src = Endpoint::parse(src_expr, false).map_err(ConfigError::source_side)?;
        let dest = Endpoint::parse(dest_expr, true).map_err(ConfigError::destination_side)?;
        Self::new(src, dest)
    }

    /// Resolve both endpoints and check that together they make a supported
    /// forwarding arrangement.
    pub fn resolve(&mut self) -> Result<()> {
        let src_onion = is_onion_host(&self.src.host);
        let dest_onion = is_onion_host(&self.dest.host);
        if src_onion && dest_onion {
            return Err(ConfigError::OnionRequired);
        }
        if !src_onion && !dest_onion && (!self.dest.host.is_empty() || self.dest.path.is_some())
        {
            return Err(ConfigError::OnionRequired);
        }

        self.src
            .resolve(src_onion)
            .map_err(ConfigError::source_side)?;
        self.dest
            .resolve(!src_onion)
            .map_err(ConfigError::destination_side)?;
        if self.src.onion == self.dest.onion {
            return Err(ConfigError::OnionRequired);
        }
        Ok(())
    }

    /// Whether this forward brings a remote onion service to a local listener
    pub fn is_import(&self) -> bool {
        self.src.onion
    }

    pub fn source(&self) -> &Endpoint {
        &self.src
    }

    pub fn destination(&self) -> &Endpoint {
        &self.dest
    }

    pub fn destination_mut(&mut self) -> &mut Endpoint {
        &mut self.dest
    }

    /// `source => destination`, substituting published onion ids by alias
    pub fn description(&self, remote_onions: &HashMap<String, String>) -> String {
        format!(
            "{} => {}",
            self.src.description(remote_onions),
            self.dest.description(remote_onions)
        )
    }
}

impl FromStr for Forward {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Forward::parse(s)
    }
}

/// `8080@blog` exports local 8080; the alias belongs to the onion side only.
fn strip_alias(s: &str) -> &str {
    match s.rsplit_once('@') {
        Some((ports, _)) if is_port_list(ports) => ports,
        _ => s,
    }
}
