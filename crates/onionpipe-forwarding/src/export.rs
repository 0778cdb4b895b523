//! Export relays: local backends published as onion services, one service per
//! alias

use crate::error::ForwardingError;
use crate::service::ForwardingOptions;
use futures::future::join_all;
use onionpipe_config::Forward;
use onionpipe_overlay::{
    Overlay, OverlayError, PortMap, Publication, PublishRequest, ServiceKey,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Upper bound on a single publication, independent of the forward lifetime
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Backends and identity for one alias
#[derive(Debug)]
pub(crate) struct ExportGroup {
    pub alias: String,
    pub ports: PortMap,
    pub key: Option<Zeroizing<Vec<u8>>>,
}

pub(crate) type Published = Vec<(String, Box<dyn Publication>)>;

/// Group export forwards by alias, taking each alias's service key off its
/// forwards. Forwards sharing an alias and backend accumulate remote ports.
pub(crate) fn group_exports(exports: &mut [Forward]) -> Result<Vec<ExportGroup>, ForwardingError> {
    let mut groups: BTreeMap<String, ExportGroup> = BTreeMap::new();
    for fwd in exports.iter_mut() {
        let alias = fwd.destination().alias_key().to_string();
        let remote_ports = fwd.destination().ports().to_vec();
        let key = fwd.destination_mut().take_service_key();

        let group = groups.entry(alias.clone()).or_insert_with(|| ExportGroup {
            alias,
            ports: PortMap::new(),
            key: None,
        });
        if group.key.is_none() {
            group.key = key;
        }

        let src = fwd.source();
        match src.path() {
            Some(path) => group.ports.add_unix(path, &remote_ports),
            None => {
                let backend = src.single_addr().map_err(ForwardingError::Source)?;
                group.ports.add_tcp(&backend, &remote_ports);
            }
        }
    }
    Ok(groups.into_values().collect())
}

/// Publish every group concurrently. If any publication fails the others are
/// closed again and the first failure is returned.
pub(crate) async fn publish_all(
    overlay: &dyn Overlay,
    groups: Vec<ExportGroup>,
    options: &ForwardingOptions,
    cancel: &CancellationToken,
) -> Result<Published, ForwardingError> {
    let attempts = groups
        .into_iter()
        .map(|group| publish_group(overlay, group, options, cancel));

    let mut published = Vec::new();
    let mut failure = None;
    for result in join_all(attempts).await {
        match result {
            Ok(publication) => published.push(publication),
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }

    match failure {
        Some(e) => {
            close_all(published).await;
            Err(e)
        }
        None => Ok(published),
    }
}

async fn publish_group(
    overlay: &dyn Overlay,
    group: ExportGroup,
    options: &ForwardingOptions,
    cancel: &CancellationToken,
) -> Result<(String, Box<dyn Publication>), ForwardingError> {
    let ExportGroup { alias, ports, key } = group;
    let key = match key {
        // The stored bytes are wiped when `bytes` drops here; the seed copy
        // is wiped when the request is dropped after publishing.
        Some(bytes) => Some(ServiceKey::from_bytes(&bytes).map_err(|e| publish_error(&alias, e))?),
        None => None,
    };
    let request = PublishRequest {
        ports,
        key,
        non_anonymous: options.non_anonymous,
        authorized_clients: options.required_client_keys.clone(),
    };

    debug!(alias = %alias, persistent = request.key.is_some(), "Publishing onion service");
    let publication = tokio::select! {
        _ = cancel.cancelled() => return Err(publish_error(&alias, OverlayError::Cancelled)),
        result = tokio::time::timeout(PUBLISH_TIMEOUT, overlay.publish(request)) => match result {
            Ok(Ok(publication)) => publication,
            Ok(Err(e)) => return Err(publish_error(&alias, e)),
            Err(_) => return Err(publish_error(&alias, OverlayError::Timeout)),
        },
    };

    info!(alias = %alias, service_id = %publication.service_id(), "Onion service up");
    Ok((alias, publication))
}

fn publish_error(alias: &str, source: OverlayError) -> ForwardingError {
    ForwardingError::Publish {
        alias: alias.to_string(),
        source,
    }
}

/// Withdraw publications, logging rather than failing on errors
pub(crate) async fn close_all(published: Published) {
    for (alias, mut publication) in published {
        match publication.close().await {
            Ok(()) => debug!(alias = %alias, "Onion service closed"),
            Err(e) => warn!(alias = %alias, error = %e, "Failed to close onion service"),
        }
    }
}
