//! `service` and `client` key management commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use onionpipe_secrets::{keys::encode_identity, SecretStore};
use serde_json::{json, Value};
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// List persistent onion services and their addresses
    Ls,
    /// Create a persistent onion service key
    New { name: String },
    /// Delete a persistent onion service key
    Rm { name: String },
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// List client keys and their public identities
    Ls,
    /// Create a client key
    New { name: String },
    /// Show a client's private key, for use with --auth elsewhere
    ShowPrivate { name: String },
    /// Delete a client key
    Rm { name: String },
}

fn open(path: &Path) -> Result<SecretStore> {
    SecretStore::read_file(path).with_context(|| format!("Failed to load secrets from {:?}", path))
}

fn save(store: &mut SecretStore) -> Result<()> {
    store.write_file().context("Failed to save secrets")
}

/// Run a service key command, returning what to print
pub fn run_service(command: ServiceCommand, path: &Path) -> Result<Option<Value>> {
    let mut store = open(path)?;
    match command {
        ServiceCommand::Ls => Ok(Some(serde_json::to_value(store.services_public())?)),
        ServiceCommand::New { name } => {
            if store.has_service_key(&name) {
                bail!("Service {:?} already exists", name);
            }
            store.ensure_service_key(&name);
            save(&mut store)?;
            let public = store.services_public();
            Ok(Some(json!({ &name: public.get(&name) })))
        }
        ServiceCommand::Rm { name } => {
            store.remove_service_key(&name)?;
            save(&mut store)?;
            Ok(None)
        }
    }
}

/// Run a client key command, returning what to print
pub fn run_client(command: ClientCommand, path: &Path) -> Result<Option<Value>> {
    let mut store = open(path)?;
    match command {
        ClientCommand::Ls => Ok(Some(serde_json::to_value(store.clients_public())?)),
        ClientCommand::New { name } => {
            if store.has_client_key(&name) {
                bail!("Client {:?} already exists", name);
            }
            store.ensure_client_key(&name);
            save(&mut store)?;
            let public = store.clients_public();
            Ok(Some(json!({ &name: public.get(&name) })))
        }
        ClientCommand::ShowPrivate { name } => {
            let pair = store
                .client_key(&name)
                .with_context(|| format!("Client {:?} not found", name))?;
            Ok(Some(json!({
                &name: {
                    "identity": encode_identity(&pair.public),
                    "private": encode_identity(pair.private.expose()),
                }
            })))
        }
        ClientCommand::Rm { name } => {
            store.remove_client_key(&name)?;
            save(&mut store)?;
            Ok(None)
        }
    }
}

pub fn print(output: &Option<Value>) -> Result<()> {
    if let Some(value) = output {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
