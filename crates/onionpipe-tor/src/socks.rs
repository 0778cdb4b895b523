//! SOCKS5 client for reaching onion services through Tor

use async_trait::async_trait;
use onionpipe_overlay::{Dialer, OverlayError, OverlayResult, OverlayStream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Dials onion addresses via the Tor SOCKS port
pub(crate) struct SocksDialer {
    socks_addr: String,
    cancel: CancellationToken,
}

impl SocksDialer {
    pub fn new(socks_addr: String, cancel: CancellationToken) -> Self {
        SocksDialer { socks_addr, cancel }
    }

    async fn connect(&self, host: &str, port: u16) -> OverlayResult<OverlayStream> {
        let stream = TcpStream::connect(&self.socks_addr).await?;
        stream.set_nodelay(true)?;
        let stream = handshake(stream, host, port).await?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Dialer for SocksDialer {
    async fn dial(&self, addr: &str) -> OverlayResult<OverlayStream> {
        if self.cancel.is_cancelled() {
            return Err(OverlayError::Cancelled);
        }
        let (host, port) = split_host_port(addr)?;
        debug!(addr = %addr, "Dialing through SOCKS");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(OverlayError::Cancelled),
            result = self.connect(host, port) => result,
        }
    }
}

fn split_host_port(addr: &str) -> OverlayResult<(&str, u16)> {
    let invalid = || OverlayError::Socks(format!("invalid address {:?}", addr));
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host, port))
}

/// Negotiate a CONNECT to `host:port` by domain name
pub(crate) async fn handshake<S>(mut stream: S, host: &str, port: u16) -> OverlayResult<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if host.len() > 255 {
        return Err(OverlayError::Socks(format!("host name too long: {}", host)));
    }

    stream.write_all(&[VERSION, 1, NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(OverlayError::Socks(format!(
            "unexpected protocol version {}",
            choice[0]
        )));
    }
    if choice[1] != NO_AUTH {
        return Err(OverlayError::Socks(
            "proxy requires an unsupported authentication method".to_string(),
        ));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[1] != 0x00 {
        return Err(OverlayError::Socks(reply_message(header[1]).to_string()));
    }

    // Bound address, unused
    let skip = match header[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize + 2
        }
        other => {
            return Err(OverlayError::Socks(format!("unknown address type {}", other)));
        }
    };
    let mut bound = vec![0u8; skip];
    stream.read_exact(&mut bound).await?;

    Ok(stream)
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS error",
    }
}
