//! onionpipe - forward local services to onion addresses and back
//!
//! Publishes local TCP and UNIX socket services as Tor onion services, and
//! makes remote onion services reachable on local listeners.

mod forward;
mod keys;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// onionpipe - Onion addresses for anything
#[derive(Parser, Debug)]
#[command(name = "onionpipe")]
#[command(about = "Forward local services to onion addresses, and onion services to local ports")]
#[command(version)]
struct Cli {
    /// Enable debug logging, including Tor control port traffic
    #[arg(long, global = true)]
    debug: bool,

    /// Secrets file holding persistent service and client keys
    #[arg(long, global = true, env = "ONIONPIPE_SECRETS")]
    secrets: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward between local addresses and onion services
    #[command(long_about = r#"
Forward between local addresses and onion services.

Each forward is SOURCE~DEST, or a single expression used for both sides:

  8080                      publish local port 8080 as onion port 8080
  8080~80                   publish local port 8080 as onion port 80
  localhost:8080~80,443     publish local 8080 as onion ports 80 and 443
  /run/app.sock~80          publish a UNIX socket as onion port 80
  8080~80@blog              publish under the persistent identity "blog"
  xxx.onion:80~8000         make a remote onion service reachable on local port 8000

Runs until interrupted with Ctrl+C."#)]
    Forward(forward::ForwardArgs),

    /// Manage persistent onion service keys
    #[command(subcommand)]
    Service(keys::ServiceCommand),

    /// Manage client authorization keys
    #[command(subcommand)]
    Client(keys::ClientCommand),
}

/// Setup logging; `RUST_LOG` takes precedence over `--debug`
fn setup_logging(debug: bool) {
    let default_filter = if debug {
        "info,onionpipe=debug,onionpipe_config=debug,onionpipe_secrets=debug,\
         onionpipe_tor=debug,onionpipe_forwarding=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn secrets_path(secrets: Option<PathBuf>) -> Result<PathBuf> {
    match secrets {
        Some(path) => Ok(path),
        None => onionpipe_secrets::default_path()
            .context("Failed to determine data directory, use --secrets"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    let secrets = secrets_path(cli.secrets)?;
    match cli.command {
        Commands::Forward(args) => forward::run(args, &secrets, cli.debug).await,
        Commands::Service(command) => keys::print(&keys::run_service(command, &secrets)?),
        Commands::Client(command) => keys::print(&keys::run_client(command, &secrets)?),
    }
}
