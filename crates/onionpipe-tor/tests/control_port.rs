//! Tor overlay against a scripted control port

use onionpipe_overlay::{ClientAuth, Overlay, OverlayError, PortMap, PublishRequest};
use onionpipe_tor::{ControlAuth, Tor, TorConfig};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

const SERVICE_ID: &str = "fakeserviceid";

type Commands = Arc<Mutex<Vec<String>>>;

/// Accepts control connections and answers the commands the overlay sends
async fn fake_control_port() -> (String, Commands) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let commands: Commands = Arc::new(Mutex::new(Vec::new()));

    let recorded = commands.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(serve(stream, recorded.clone()));
        }
    });

    (addr, commands)
}

async fn serve(stream: TcpStream, commands: Commands) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        commands.lock().unwrap().push(line.clone());
        let response = if line.starts_with("ADD_ONION") {
            format!(
                "250-ServiceID={id}\r\n250 OK\r\n\
                 650 HS_DESC UPLOAD {id} UNKNOWN hsdir\r\n\
                 650 HS_DESC UPLOADED {id} UNKNOWN hsdir\r\n",
                id = SERVICE_ID
            )
        } else if line == "QUIT" {
            writer.write_all(b"250 closing connection\r\n").await.unwrap();
            return;
        } else {
            "250 OK\r\n".to_string()
        };
        if writer.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn recorded(commands: &Commands) -> Vec<String> {
    commands.lock().unwrap().clone()
}

#[tokio::test]
async fn test_publish_and_withdraw() {
    let (control_addr, commands) = fake_control_port().await;
    let tor = Tor::start(TorConfig {
        control_addr,
        ..Default::default()
    })
    .await
    .unwrap();

    let mut ports = PortMap::new();
    ports.add_tcp("127.0.0.1:8080", &[80]);
    let mut publication = tor
        .publish(PublishRequest {
            ports,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(publication.service_id(), SERVICE_ID);

    publication.close().await.unwrap();
    publication.close().await.unwrap();
    tor.close().await.unwrap();

    let commands = recorded(&commands);
    assert_eq!(
        commands,
        vec![
            "AUTHENTICATE".to_string(),
            "AUTHENTICATE".to_string(),
            "SETEVENTS HS_DESC".to_string(),
            "ADD_ONION NEW:ED25519-V3 Flags=DiscardPK Port=80,127.0.0.1:8080".to_string(),
            "SETEVENTS".to_string(),
            format!("DEL_ONION {}", SERVICE_ID),
            "QUIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_registers_client_auth_with_password() {
    let (control_addr, commands) = fake_control_port().await;
    let tor = Tor::start(TorConfig {
        control_addr,
        auth: ControlAuth::Password("secret".to_string()),
        client_auths: vec![ClientAuth {
            onion_id: "remoteservice".to_string(),
            private_key: Zeroizing::new(vec![0u8; 32]),
        }],
        ..Default::default()
    })
    .await
    .unwrap();

    let commands = recorded(&commands);
    assert_eq!(commands[0], "AUTHENTICATE \"secret\"");
    assert_eq!(
        commands[1],
        "ONION_CLIENT_AUTH_ADD remoteservice x25519:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
    );
    tor.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_overlay_refuses_work() {
    let (control_addr, _commands) = fake_control_port().await;
    let tor = Tor::start(TorConfig {
        control_addr,
        ..Default::default()
    })
    .await
    .unwrap();
    tor.close().await.unwrap();
    tor.close().await.unwrap();

    assert!(matches!(
        tor.dialer(CancellationToken::new()).await,
        Err(OverlayError::Closed)
    ));
    assert!(matches!(
        tor.publish(PublishRequest::default()).await,
        Err(OverlayError::Closed)
    ));
}

#[tokio::test]
async fn test_unreachable_control_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = Tor::start(TorConfig {
        control_addr,
        ..Default::default()
    })
    .await
    .err()
    .unwrap();
    assert!(err.to_string().contains("failed to connect to control port"));
}
