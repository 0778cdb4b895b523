use std::collections::BTreeMap;
use std::path::Path;

/// Backend key prefix marking a UNIX socket path
pub const UNIX_PREFIX: &str = "unix:";

/// Local backends of one onion service, each with the remote ports it serves.
///
/// Backends are `host:port` TCP addresses or `unix:<path>` sockets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMap(BTreeMap<String, Vec<u16>>);

impl PortMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `remote_ports` from a TCP backend
    pub fn add_tcp(&mut self, backend: &str, remote_ports: &[u16]) {
        self.add(backend.to_string(), remote_ports);
    }

    /// Serve `remote_ports` from a UNIX socket backend
    pub fn add_unix(&mut self, path: &Path, remote_ports: &[u16]) {
        self.add(format!("{}{}", UNIX_PREFIX, path.display()), remote_ports);
    }

    fn add(&mut self, backend: String, remote_ports: &[u16]) {
        let ports = self.0.entry(backend).or_default();
        for port in remote_ports {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Remote ports served by `backend`
    pub fn get(&self, backend: &str) -> Option<&[u16]> {
        self.0.get(backend).map(Vec::as_slice)
    }

    /// `(backend, remote ports)` pairs in backend order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u16])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// `(remote port, backend)` pairs, one per published port
    pub fn targets(&self) -> impl Iterator<Item = (u16, &str)> {
        self.iter()
            .flat_map(|(backend, ports)| ports.iter().map(move |port| (*port, backend)))
    }
}
