use crate::error::ForwardingError;
use crate::export::{self, Published};
use crate::import::{self, LocalListener};
use onionpipe_config::Forward;
use onionpipe_overlay::Overlay;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Options applied to every forward of a service
#[derive(Debug, Clone, Default)]
pub struct ForwardingOptions {
    /// Publish single-hop, non-anonymous services; imports are refused
    pub non_anonymous: bool,
    /// Base32 client identities allowed to reach published services
    pub required_client_keys: Vec<String>,
}

/// Runs a set of forwards against an overlay and tears them down together.
///
/// Imports get one accept loop each. Exports are grouped by alias and each
/// group is published as one onion service.
pub struct ForwardingService {
    overlay: Arc<dyn Overlay>,
    imports: Vec<Forward>,
    exports: Vec<Forward>,
    options: ForwardingOptions,
    done: CancellationToken,
    started: bool,
}

impl ForwardingService {
    pub fn new(
        overlay: Arc<dyn Overlay>,
        forwards: Vec<Forward>,
        options: ForwardingOptions,
    ) -> Self {
        let (imports, exports) = forwards.into_iter().partition(Forward::is_import);
        ForwardingService {
            overlay,
            imports,
            exports,
            options,
            done: CancellationToken::new(),
            started: false,
        }
    }

    pub fn imports(&self) -> &[Forward] {
        &self.imports
    }

    pub fn exports(&self) -> &[Forward] {
        &self.exports
    }

    /// Start all relays. Returns published onion service ids by alias, the
    /// anonymous service under `""`.
    ///
    /// Everything started here stops once `cancel` fires; [`Self::done`]
    /// fires after that, whether or not starting succeeded.
    pub async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, String>, ForwardingError> {
        if self.started {
            return Err(ForwardingError::AlreadyStarted);
        }
        self.started = true;

        let mut accept_loops = Vec::new();
        let started = self.start_relays(&cancel, &mut accept_loops).await;
        let (onions, published) = match started {
            Ok(published) => {
                let onions: HashMap<String, String> = published
                    .iter()
                    .map(|(alias, publication)| {
                        (alias.clone(), publication.service_id().to_string())
                    })
                    .collect();
                (Ok(onions), published)
            }
            Err(e) => (Err(e), Vec::new()),
        };

        tokio::spawn(shutdown_when_cancelled(
            cancel,
            published,
            accept_loops,
            self.done.clone(),
        ));
        onions
    }

    async fn start_relays(
        &mut self,
        cancel: &CancellationToken,
        accept_loops: &mut Vec<JoinHandle<()>>,
    ) -> Result<Published, ForwardingError> {
        if !self.imports.is_empty() {
            if self.options.non_anonymous {
                return Err(ForwardingError::ImportsNotSupported);
            }
            let dialer = self
                .overlay
                .dialer(cancel.clone())
                .await
                .map_err(ForwardingError::Dialer)?;

            for fwd in &self.imports {
                let remote_addr = fwd.source().single_addr().map_err(ForwardingError::Source)?;
                let listener = LocalListener::bind(fwd.destination()).await?;
                accept_loops.push(tokio::spawn(import::run_accept_loop(
                    listener,
                    dialer.clone(),
                    remote_addr,
                    cancel.clone(),
                )));
            }
        }

        if self.exports.is_empty() {
            return Ok(Vec::new());
        }
        let groups = export::group_exports(&mut self.exports)?;
        export::publish_all(self.overlay.as_ref(), groups, &self.options, cancel).await
    }

    /// Fires once the service has fully stopped. The overlay must not be
    /// closed before this.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Wait until the service has fully stopped
    pub async fn stopped(&self) {
        self.done.cancelled().await;
    }
}

async fn shutdown_when_cancelled(
    cancel: CancellationToken,
    published: Published,
    accept_loops: Vec<JoinHandle<()>>,
    done: CancellationToken,
) {
    cancel.cancelled().await;
    info!(services = published.len(), "Stopping forwards");

    export::close_all(published).await;
    for accept_loop in accept_loops {
        if let Err(e) = accept_loop.await {
            debug!(error = %e, "Accept loop ended abnormally");
        }
    }
    done.cancel();
}
