//! `forward` command

use anyhow::{bail, Context, Result};
use clap::Args;
use onionpipe_config::{Forward, ForwardDoc};
use onionpipe_forwarding::{ForwardingOptions, ForwardingService};
use onionpipe_overlay::{ClientAuth, Overlay};
use onionpipe_secrets::{keys, SecretStore};
use onionpipe_tor::{ControlAuth, Tor, TorConfig, DEFAULT_CONTROL_ADDR, DEFAULT_SOCKS_ADDR};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ForwardArgs {
    /// Forward expressions, SOURCE~DEST or PORTS[@ALIAS]
    forwards: Vec<String>,

    /// JSON file holding an array of {"src": ..., "dest": ...} forwards
    #[arg(long)]
    forwards_file: Option<PathBuf>,

    /// Publish single-hop, non-anonymous onion services (no imports)
    #[arg(long)]
    non_anonymous: bool,

    /// Client key (stored name or base32 private key) for remote onions
    /// requiring client authorization
    #[arg(long)]
    auth: Option<String>,

    /// Only allow this base32 client identity to reach published services;
    /// may be repeated
    #[arg(long = "require-auth")]
    require_auth: Vec<String>,

    #[command(flatten)]
    tor: TorArgs,
}

#[derive(Args, Debug)]
pub struct TorArgs {
    /// Tor control port address
    #[arg(long, env = "ONIONPIPE_TOR_CONTROL", default_value = DEFAULT_CONTROL_ADDR)]
    tor_control: String,

    /// Tor SOCKS port address
    #[arg(long, env = "ONIONPIPE_TOR_SOCKS", default_value = DEFAULT_SOCKS_ADDR)]
    tor_socks: String,

    /// Tor control port password
    #[arg(long, env = "ONIONPIPE_TOR_PASSWORD", conflicts_with = "tor_cookie")]
    tor_password: Option<String>,

    /// Tor control port authentication cookie file
    #[arg(long, env = "ONIONPIPE_TOR_COOKIE")]
    tor_cookie: Option<PathBuf>,
}

impl TorArgs {
    fn control_auth(&self) -> ControlAuth {
        match (&self.tor_password, &self.tor_cookie) {
            (Some(password), _) => ControlAuth::Password(password.clone()),
            (None, Some(cookie)) => ControlAuth::Cookie(cookie.clone()),
            (None, None) => ControlAuth::Null,
        }
    }
}

/// Run-wide options, split into the overlay and forwarding configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub debug: bool,
    pub non_anonymous: bool,
    pub client_auth: Option<String>,
    pub require_auth: Vec<String>,
}

impl RunOptions {
    fn tor_config(&self, tor: &TorArgs, client_auths: Vec<ClientAuth>) -> TorConfig {
        TorConfig {
            control_addr: tor.tor_control.clone(),
            socks_addr: tor.tor_socks.clone(),
            auth: tor.control_auth(),
            client_auths,
            debug: self.debug,
        }
    }

    fn forwarding_options(&self) -> ForwardingOptions {
        ForwardingOptions {
            non_anonymous: self.non_anonymous,
            required_client_keys: self.require_auth.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

pub async fn run(args: ForwardArgs, secrets: &Path, debug: bool) -> Result<()> {
    let mut forwards = parse_forwards(&args.forwards, args.forwards_file.as_deref())?;
    if forwards.is_empty() {
        bail!("No forwards given");
    }
    // Listed in input order; taken before any service key is attached.
    let listed = forwards.clone();

    let options = RunOptions {
        debug,
        non_anonymous: args.non_anonymous,
        client_auth: args.auth.clone(),
        require_auth: args.require_auth.clone(),
    };
    validate_client_identities(&options.require_auth)?;

    let mut store = SecretStore::read_file(secrets)
        .with_context(|| format!("Failed to load secrets from {:?}", secrets))?;
    attach_service_keys(&mut store, &mut forwards);
    store.write_file().context("Failed to save secrets")?;
    let client_auths = resolve_client_auths(&store, options.client_auth.as_deref(), &forwards)?;
    drop(store);

    let tor = Arc::new(
        Tor::start(options.tor_config(&args.tor, client_auths))
            .await
            .context("Failed to connect to Tor")?,
    );

    let mut service = ForwardingService::new(tor.clone(), forwards, options.forwarding_options());
    let cancel = CancellationToken::new();
    let onions = match service.start(cancel.clone()).await {
        Ok(onions) => onions,
        Err(e) => {
            cancel.cancel();
            service.stopped().await;
            if let Err(close_err) = tor.close().await {
                warn!(error = %close_err, "Failed to close Tor connection");
            }
            return Err(e).context("Failed to start forwarding");
        }
    };

    for line in describe_forwards(&listed, &onions) {
        println!("{}", line);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    cancel.cancel();
    service.stopped().await;
    tor.close().await.context("Failed to close Tor connection")?;
    info!("onionpipe stopped");
    Ok(())
}

/// Forwards from command line expressions, then from the forwards file
fn parse_forwards(exprs: &[String], file: Option<&Path>) -> Result<Vec<Forward>> {
    let mut forwards = Vec::new();
    for expr in exprs {
        let fwd = Forward::parse(expr).with_context(|| format!("Invalid forward {:?}", expr))?;
        forwards.push(fwd);
    }

    if let Some(file) = file {
        let json = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read forwards file {:?}", file))?;
        let docs = ForwardDoc::parse_list(&json)
            .with_context(|| format!("Failed to parse forwards file {:?}", file))?;
        for (index, doc) in docs.iter().enumerate() {
            let fwd = doc
                .forward()
                .with_context(|| format!("Invalid forward #{} in {:?}", index + 1, file))?;
            forwards.push(fwd);
        }
    }
    Ok(forwards)
}

fn describe_forwards(forwards: &[Forward], onions: &HashMap<String, String>) -> Vec<String> {
    forwards.iter().map(|fwd| fwd.description(onions)).collect()
}

/// Give every aliased export the persistent key for its alias, creating keys
/// as needed
fn attach_service_keys(store: &mut SecretStore, forwards: &mut [Forward]) {
    for fwd in forwards.iter_mut().filter(|fwd| !fwd.is_import()) {
        let Some(alias) = fwd.destination().alias().map(str::to_string) else {
            continue;
        };
        let key = store.ensure_service_key(&alias);
        fwd.destination_mut().set_service_key(key);
    }
}

fn validate_client_identities(identities: &[String]) -> Result<()> {
    for identity in identities {
        match keys::decode_identity(identity) {
            Some(key) if key.len() == 32 => {}
            _ => bail!("Invalid client identity {:?}", identity),
        }
    }
    Ok(())
}

/// Client authorization for every imported onion, when `--auth` is given
fn resolve_client_auths(
    store: &SecretStore,
    client_auth: Option<&str>,
    forwards: &[Forward],
) -> Result<Vec<ClientAuth>> {
    let Some(name_or_key) = client_auth else {
        return Ok(Vec::new());
    };
    let private_key = store
        .resolve_client_private_key(name_or_key)
        .context("Failed to resolve --auth")?;

    let mut auths: Vec<ClientAuth> = Vec::new();
    for fwd in forwards.iter().filter(|fwd| fwd.is_import()) {
        let Some(onion_id) = fwd.source().onion_id() else {
            continue;
        };
        if auths.iter().any(|auth| auth.onion_id == onion_id) {
            continue;
        }
        auths.push(ClientAuth {
            onion_id: onion_id.to_string(),
            private_key: private_key.clone(),
        });
    }
    Ok(auths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_forwards_from_args_and_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("forwards.json");
        std::fs::write(
            &file,
            r#"[{"src": {"ports": [3000]}, "dest": {"ports": [80], "alias": "app"}}]"#,
        )
        .unwrap();

        let forwards = parse_forwards(&["8080~80".to_string()], Some(&file)).unwrap();
        assert_eq!(forwards.len(), 2);
        assert_eq!(forwards[1].destination().alias(), Some("app"));
    }

    #[test]
    fn test_parse_forwards_reports_expression() {
        let err = parse_forwards(&["80,81".to_string()], None).unwrap_err();
        assert_eq!(err.to_string(), "Invalid forward \"80,81\"");
        assert_eq!(
            err.root_cause().to_string(),
            "forward source: local network address may only specify a single port"
        );
    }

    #[test]
    fn test_attach_service_keys_persists_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        let mut store = SecretStore::read_file(&path).unwrap();

        let mut forwards = parse_forwards(
            &[
                "8080~80@blog".to_string(),
                "8081~81@blog".to_string(),
                "9000".to_string(),
            ],
            None,
        )
        .unwrap();
        attach_service_keys(&mut store, &mut forwards);

        assert_eq!(
            forwards[0].destination().service_key(),
            forwards[1].destination().service_key()
        );
        assert!(forwards[0].destination().service_key().is_some());
        assert!(forwards[2].destination().service_key().is_none());

        store.write_file().unwrap();
        let reloaded = SecretStore::read_file(&path).unwrap();
        assert!(reloaded.has_service_key("blog"));
    }

    #[test]
    fn test_validate_client_identities() {
        let mut store = SecretStore::default();
        let pair = store.ensure_client_key("laptop");
        let identity = keys::encode_identity(&pair.public);

        validate_client_identities(&[identity.clone(), identity.to_uppercase()]).unwrap();
        assert!(validate_client_identities(&["not base32!".to_string()]).is_err());
        assert!(validate_client_identities(&["aaaa".to_string()]).is_err());
    }

    #[test]
    fn test_resolve_client_auths_for_imports() {
        let mut store = SecretStore::default();
        store.ensure_client_key("laptop");
        let forwards = parse_forwards(
            &[
                "remoteone.onion:80~8000".to_string(),
                "remoteone.onion:443~8443".to_string(),
                "remotetwo.onion:80~9000".to_string(),
                "3000".to_string(),
            ],
            None,
        )
        .unwrap();

        let auths = resolve_client_auths(&store, Some("laptop"), &forwards).unwrap();
        let ids: Vec<&str> = auths.iter().map(|a| a.onion_id.as_str()).collect();
        assert_eq!(ids, vec!["remoteone", "remotetwo"]);

        assert!(resolve_client_auths(&store, None, &forwards).unwrap().is_empty());
        assert!(resolve_client_auths(&store, Some("desktop"), &forwards).is_err());
    }

    #[test]
    fn test_descriptions_keep_input_order() {
        let forwards = parse_forwards(
            &[
                "3000@app".to_string(),
                "remoteone.onion:80~8000".to_string(),
                "9000".to_string(),
            ],
            None,
        )
        .unwrap();
        let mut onions = HashMap::new();
        onions.insert("app".to_string(), "appid".to_string());
        onions.insert(String::new(), "anonid".to_string());

        assert_eq!(
            describe_forwards(&forwards, &onions),
            vec![
                "127.0.0.1:3000 => appid.onion:3000".to_string(),
                "remoteone.onion:80 => 127.0.0.1:8000".to_string(),
                "127.0.0.1:9000 => anonid.onion:9000".to_string(),
            ]
        );
    }

    #[test]
    fn test_run_options_split() {
        let options = RunOptions {
            debug: true,
            non_anonymous: true,
            client_auth: None,
            require_auth: vec!["ABCD".to_string()],
        };
        let tor = TorArgs {
            tor_control: "127.0.0.1:9151".to_string(),
            tor_socks: "127.0.0.1:9150".to_string(),
            tor_password: None,
            tor_cookie: Some(PathBuf::from("/var/lib/tor/control_auth_cookie")),
        };

        let config = options.tor_config(&tor, Vec::new());
        assert_eq!(config.control_addr, "127.0.0.1:9151");
        assert!(config.debug);
        assert!(matches!(config.auth, ControlAuth::Cookie(_)));

        let forwarding = options.forwarding_options();
        assert!(forwarding.non_anonymous);
        assert_eq!(forwarding.required_client_keys, vec!["abcd".to_string()]);
    }
}
