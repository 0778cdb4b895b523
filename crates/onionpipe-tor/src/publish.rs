use crate::control::ControlConnection;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use onionpipe_overlay::{OverlayError, OverlayResult, Publication, PublishRequest, ServiceKey};
use sha2::{Digest, Sha512};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// An onion service added over its own control connection. Tor removes the
/// service when that connection closes, so dropping this withdraws it too.
pub(crate) struct TorPublication {
    control: Option<ControlConnection<TcpStream>>,
    service_id: String,
}

impl TorPublication {
    /// Add the onion service and wait for its first descriptor upload
    pub async fn create(
        mut control: ControlConnection<TcpStream>,
        request: &PublishRequest,
    ) -> OverlayResult<Self> {
        control.command("SETEVENTS HS_DESC").await?;

        let command = add_onion_command(request);
        let reply = control.command(&command).await?;
        drop(command);
        let service_id = reply
            .value("ServiceID")
            .ok_or_else(|| OverlayError::Control("ADD_ONION reply missing ServiceID".to_string()))?
            .to_string();
        debug!(service_id = %service_id, "Onion service added, waiting for descriptor upload");

        loop {
            let event = control.next_event().await?;
            let Some(line) = event.lines.first() else {
                continue;
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                ["HS_DESC", "UPLOADED", address, ..] if *address == service_id => break,
                ["HS_DESC", "FAILED", address, ..] if *address == service_id => {
                    warn!(service_id = %service_id, "Descriptor upload failed, waiting for retry");
                }
                _ => {}
            }
        }

        control.command("SETEVENTS").await?;
        control.clear_events();

        info!(service_id = %service_id, "Onion service published");
        Ok(TorPublication {
            control: Some(control),
            service_id,
        })
    }
}

#[async_trait]
impl Publication for TorPublication {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    async fn close(&mut self) -> OverlayResult<()> {
        let Some(mut control) = self.control.take() else {
            return Ok(());
        };
        control
            .command(&format!("DEL_ONION {}", self.service_id))
            .await?;
        info!(service_id = %self.service_id, "Onion service removed");
        Ok(())
    }
}

/// `ADD_ONION` command line for `request`
pub(crate) fn add_onion_command(request: &PublishRequest) -> Zeroizing<String> {
    let mut command = Zeroizing::new(String::from("ADD_ONION "));
    match &request.key {
        Some(key) => {
            command.push_str("ED25519-V3:");
            command.push_str(&expanded_key_base64(key));
        }
        None => command.push_str("NEW:ED25519-V3"),
    }

    command.push_str(" Flags=DiscardPK");
    if request.non_anonymous {
        command.push_str(",NonAnonymous");
    }
    if !request.authorized_clients.is_empty() {
        command.push_str(",V3Auth");
    }

    for (port, backend) in request.ports.targets() {
        command.push_str(&format!(" Port={},{}", port, backend));
    }
    for client in &request.authorized_clients {
        command.push_str(&format!(" ClientAuthV3={}", client));
    }
    command
}

/// Tor's ed25519 key format: SHA-512 of the seed with the scalar clamped
fn expanded_key_base64(key: &ServiceKey) -> Zeroizing<String> {
    let mut expanded = Zeroizing::new([0u8; 64]);
    expanded.copy_from_slice(&Sha512::digest(key.seed()));
    expanded[0] &= 248;
    expanded[31] &= 127;
    expanded[31] |= 64;
    Zeroizing::new(BASE64.encode(expanded.as_slice()))
}
