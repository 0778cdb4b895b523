//! Test overlays and local servers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use onionpipe_overlay::{
    Dialer, Overlay, OverlayError, OverlayResult, OverlayStream, Publication, PublishRequest,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Overlay that "dials" onion addresses by connecting to local servers and
/// records what it is asked to publish
#[derive(Default)]
pub struct LoopbackOverlay {
    routes: Arc<Mutex<HashMap<String, SocketAddr>>>,
    pub requests: Mutex<Vec<PublishRequest>>,
    pub closed: Arc<AtomicUsize>,
}

impl LoopbackOverlay {
    pub fn route(&self, onion_addr: &str, target: SocketAddr) {
        self.routes
            .lock()
            .unwrap()
            .insert(onion_addr.to_string(), target);
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Overlay for LoopbackOverlay {
    async fn dialer(&self, cancel: CancellationToken) -> OverlayResult<Arc<dyn Dialer>> {
        Ok(Arc::new(LoopbackDialer {
            routes: self.routes.clone(),
            cancel,
        }))
    }

    async fn publish(&self, request: PublishRequest) -> OverlayResult<Box<dyn Publication>> {
        let mut requests = self.requests.lock().unwrap();
        let service_id = format!("loopback{}", requests.len());
        requests.push(request);
        Ok(Box::new(FakePublication::new(service_id, self.closed.clone())))
    }

    async fn close(&self) -> OverlayResult<()> {
        Ok(())
    }
}

struct LoopbackDialer {
    routes: Arc<Mutex<HashMap<String, SocketAddr>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self, addr: &str) -> OverlayResult<OverlayStream> {
        if self.cancel.is_cancelled() {
            return Err(OverlayError::Cancelled);
        }
        let target = self.routes.lock().unwrap().get(addr).copied();
        let target = target.ok_or_else(|| OverlayError::Socks("host unreachable".to_string()))?;
        Ok(Box::new(TcpStream::connect(target).await?))
    }
}

/// Publication that counts how many times it was closed
pub struct FakePublication {
    service_id: String,
    closed: Arc<AtomicUsize>,
    is_closed: bool,
}

impl FakePublication {
    pub fn new(service_id: impl Into<String>, closed: Arc<AtomicUsize>) -> Self {
        FakePublication {
            service_id: service_id.into(),
            closed,
            is_closed: false,
        }
    }
}

#[async_trait]
impl Publication for FakePublication {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    async fn close(&mut self) -> OverlayResult<()> {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Overlay whose publications never complete
pub struct StalledOverlay;

#[async_trait]
impl Overlay for StalledOverlay {
    async fn dialer(&self, _cancel: CancellationToken) -> OverlayResult<Arc<dyn Dialer>> {
        Err(OverlayError::Closed)
    }

    async fn publish(&self, _request: PublishRequest) -> OverlayResult<Box<dyn Publication>> {
        std::future::pending().await
    }

    async fn close(&self) -> OverlayResult<()> {
        Ok(())
    }
}

/// TCP server echoing everything back, one task per connection
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = stream.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

/// A local port that was free a moment ago
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Write `message` and read the same number of bytes back
pub async fn round_trip<S>(stream: &mut S, message: &[u8]) -> Vec<u8>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(message).await.unwrap();
    let mut buf = vec![0u8; message.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    buf
}

/// Wait for the service completion token, failing the test if it never fires
pub async fn wait_done(done: CancellationToken) {
    tokio::time::timeout(Duration::from_secs(10), done.cancelled())
        .await
        .expect("forwarding service did not stop");
}
