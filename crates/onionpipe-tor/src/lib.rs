//! Overlay backed by a running Tor daemon
//!
//! Tor itself is started and configured elsewhere; this crate connects to its
//! control port for publishing onion services and registering client
//! authorization, and to its SOCKS port for dialing remote onion services.

mod config;
mod control;
mod publish;
mod socks;

pub use config::{ControlAuth, TorConfig, DEFAULT_CONTROL_ADDR, DEFAULT_SOCKS_ADDR};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use control::ControlConnection;
use onionpipe_overlay::{
    Dialer, Overlay, OverlayError, OverlayResult, Publication, PublishRequest,
};
use publish::TorPublication;
use socks::SocksDialer;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Handle to a running Tor daemon
pub struct Tor {
    config: TorConfig,
    control: Mutex<Option<ControlConnection<TcpStream>>>,
}

impl Tor {
    /// Connect and authenticate to the control port, then register client
    /// authorization keys.
    pub async fn start(config: TorConfig) -> OverlayResult<Self> {
        let mut control = connect_control(&config).await?;

        for auth in &config.client_auths {
            let key = Zeroizing::new(BASE64.encode(auth.private_key.as_slice()));
            control
                .command(&format!(
                    "ONION_CLIENT_AUTH_ADD {} x25519:{}",
                    auth.onion_id, *key
                ))
                .await?;
            debug!(onion_id = %auth.onion_id, "Registered client authorization");
        }

        info!(control = %config.control_addr, socks = %config.socks_addr, "Connected to Tor");
        Ok(Tor {
            config,
            control: Mutex::new(Some(control)),
        })
    }

    async fn ensure_open(&self) -> OverlayResult<()> {
        if self.control.lock().await.is_none() {
            return Err(OverlayError::Closed);
        }
        Ok(())
    }
}

async fn connect_control(config: &TorConfig) -> OverlayResult<ControlConnection<TcpStream>> {
    let stream = TcpStream::connect(&config.control_addr)
        .await
        .map_err(|e| {
            OverlayError::Control(format!(
                "failed to connect to control port {}: {}",
                config.control_addr, e
            ))
        })?;
    let mut control = ControlConnection::new(stream, config.debug);
    control.authenticate(&config.auth).await?;
    Ok(control)
}

#[async_trait]
impl Overlay for Tor {
    async fn dialer(&self, cancel: CancellationToken) -> OverlayResult<Arc<dyn Dialer>> {
        self.ensure_open().await?;
        Ok(Arc::new(SocksDialer::new(
            self.config.socks_addr.clone(),
            cancel,
        )))
    }

    async fn publish(&self, request: PublishRequest) -> OverlayResult<Box<dyn Publication>> {
        self.ensure_open().await?;
        let control = connect_control(&self.config).await?;
        let publication = TorPublication::create(control, &request).await?;
        Ok(Box::new(publication))
    }

    async fn close(&self) -> OverlayResult<()> {
        let Some(mut control) = self.control.lock().await.take() else {
            return Ok(());
        };
        match control.command("QUIT").await {
            Ok(_) | Err(OverlayError::Closed) => {}
            Err(e) => return Err(e),
        }
        info!("Disconnected from Tor");
        Ok(())
    }
}
