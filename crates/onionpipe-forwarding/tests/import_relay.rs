//! Import forwards relayed through a loopback overlay

mod common;

use common::{echo_server, free_port, round_trip, wait_done, LoopbackOverlay};
use onionpipe_config::Forward;
use onionpipe_forwarding::{ForwardingError, ForwardingOptions, ForwardingService};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

const REMOTE: &str = "remoteservice.onion:80";

#[tokio::test]
async fn test_import_relays_to_remote_service() {
    let overlay = Arc::new(LoopbackOverlay::default());
    overlay.route(REMOTE, echo_server().await);

    let port = free_port().await;
    let fwd = Forward::parse(&format!("{}~{}", REMOTE, port)).unwrap();
    let mut service =
        ForwardingService::new(overlay.clone(), vec![fwd], ForwardingOptions::default());

    let cancel = CancellationToken::new();
    let onions = service.start(cancel.clone()).await.unwrap();
    assert!(onions.is_empty());

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert_eq!(round_trip(&mut client, b"hello onion").await, b"hello onion");

    cancel.cancel();
    wait_done(service.done()).await;
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_dial_failure_keeps_listener_running() {
    let overlay = Arc::new(LoopbackOverlay::default());
    let port = free_port().await;
    let fwd = Forward::parse(&format!("{}~{}", REMOTE, port)).unwrap();
    let mut service =
        ForwardingService::new(overlay.clone(), vec![fwd], ForwardingOptions::default());

    let cancel = CancellationToken::new();
    service.start(cancel.clone()).await.unwrap();

    // No route yet: the relay drops this connection.
    let mut refused = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), refused.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    overlay.route(REMOTE, echo_server().await);
    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert_eq!(round_trip(&mut client, b"second try").await, b"second try");

    cancel.cancel();
    wait_done(service.done()).await;
}

#[tokio::test]
async fn test_import_to_unix_socket() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("import.sock");
    // Resolution requires an existing socket file; the relay replaces it.
    drop(UnixListener::bind(&path).unwrap());

    let overlay = Arc::new(LoopbackOverlay::default());
    overlay.route(REMOTE, echo_server().await);

    let fwd = Forward::parse(&format!("{}~{}", REMOTE, path.display())).unwrap();
    let mut service =
        ForwardingService::new(overlay.clone(), vec![fwd], ForwardingOptions::default());

    let cancel = CancellationToken::new();
    service.start(cancel.clone()).await.unwrap();

    let mut client = UnixStream::connect(&path).await.unwrap();
    assert_eq!(round_trip(&mut client, b"over unix").await, b"over unix");

    cancel.cancel();
    wait_done(service.done()).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_listen_failure() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let overlay = Arc::new(LoopbackOverlay::default());
    let fwd = Forward::parse(&format!("{}~{}", REMOTE, port)).unwrap();
    let mut service = ForwardingService::new(overlay, vec![fwd], ForwardingOptions::default());

    let cancel = CancellationToken::new();
    let err = service.start(cancel.clone()).await.unwrap_err();
    assert!(matches!(err, ForwardingError::Listen { .. }));
    assert!(err
        .to_string()
        .starts_with(&format!("failed to listen on local address \"127.0.0.1:{}\"", port)));

    cancel.cancel();
    wait_done(service.done()).await;
}

#[tokio::test]
async fn test_imports_refused_when_non_anonymous() {
    let overlay = Arc::new(LoopbackOverlay::default());
    let fwd = Forward::parse(&format!("{}~{}", REMOTE, free_port().await)).unwrap();
    let options = ForwardingOptions {
        non_anonymous: true,
        ..Default::default()
    };
    let mut service = ForwardingService::new(overlay, vec![fwd], options);

    let cancel = CancellationToken::new();
    let err = service.start(cancel.clone()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "import forwards not supported in non-anonymous single-hop mode"
    );

    cancel.cancel();
    wait_done(service.done()).await;
}

#[tokio::test]
async fn test_start_only_once() {
    let overlay = Arc::new(LoopbackOverlay::default());
    let mut service = ForwardingService::new(overlay, Vec::new(), ForwardingOptions::default());

    let cancel = CancellationToken::new();
    service.start(cancel.clone()).await.unwrap();
    assert!(matches!(
        service.start(cancel.clone()).await,
        Err(ForwardingError::AlreadyStarted)
    ));

    cancel.cancel();
    wait_done(service.done()).await;
}
