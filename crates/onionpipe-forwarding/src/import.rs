//! Import relays: local listeners bridged to remote onion services

use crate::error::ForwardingError;
use crate::relay::relay;
use onionpipe_config::Endpoint;
use onionpipe_overlay::{AsyncStream, Dialer};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// UNIX socket listener that unlinks its socket file when dropped
pub(crate) struct UnixSocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Where an import relay accepts local connections
pub(crate) enum LocalListener {
    Tcp(TcpListener),
    Unix(UnixSocketListener),
}

impl LocalListener {
    /// Listen on the local destination of an import forward
    pub async fn bind(dest: &Endpoint) -> Result<Self, ForwardingError> {
        let address = dest.single_addr().map_err(ForwardingError::Destination)?;
        let listen_error = |source: io::Error| ForwardingError::Listen {
            address: address.clone(),
            source,
        };

        match dest.path() {
            Some(path) => {
                // Resolution only accepts an existing socket file here.
                remove_stale_socket(path).map_err(listen_error)?;
                let listener = UnixListener::bind(path).map_err(listen_error)?;
                Ok(LocalListener::Unix(UnixSocketListener {
                    listener,
                    path: path.to_path_buf(),
                }))
            }
            None => {
                let listener = TcpListener::bind(&address).await.map_err(listen_error)?;
                Ok(LocalListener::Tcp(listener))
            }
        }
    }

    async fn accept(&self) -> io::Result<Box<dyn AsyncStream>> {
        match self {
            LocalListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(peer = %peer, "Accepted local connection");
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            LocalListener::Unix(unix) => {
                let (stream, _) = unix.listener.accept().await?;
                debug!(path = %unix.path.display(), "Accepted local connection");
                Ok(Box::new(stream))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            LocalListener::Tcp(listener) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            LocalListener::Unix(unix) => unix.path.display().to_string(),
        }
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Accept local connections until cancelled, relaying each to `remote_addr`
pub(crate) async fn run_accept_loop(
    listener: LocalListener,
    dialer: Arc<dyn Dialer>,
    remote_addr: String,
    cancel: CancellationToken,
) {
    let local = listener.describe();
    info!(local = %local, remote = %remote_addr, "Import relay listening");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(local = %local, "Import relay stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    tokio::spawn(relay_connection(
                        stream,
                        dialer.clone(),
                        remote_addr.clone(),
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    warn!(local = %local, error = %e, "Failed to accept local connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    info!(local = %local, remote = %remote_addr, "Import relay closed");
}

/// Dial the remote service and copy until either side is done. Failures end
/// only this connection.
async fn relay_connection(
    local: Box<dyn AsyncStream>,
    dialer: Arc<dyn Dialer>,
    remote_addr: String,
    cancel: CancellationToken,
) {
    let remote = match dialer.dial(&remote_addr).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(remote = %remote_addr, error = %e, "Failed to dial onion service");
            return;
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(remote = %remote_addr, "Relay cancelled");
        }
        result = relay(local, remote) => match result {
            Ok((sent, received)) => {
                debug!(
                    remote = %remote_addr,
                    bytes_sent = sent,
                    bytes_received = received,
                    "Relay completed"
                );
            }
            Err(e) => warn!(remote = %remote_addr, error = %e, "Relay failed"),
        }
    }
}
