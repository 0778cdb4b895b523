//! Minimal Tor control protocol client
//!
//! Commands are written one line at a time and their replies read back in
//! order. Asynchronous `650` events that arrive while waiting for a reply are
//! queued for [`ControlConnection::next_event`].

use crate::config::ControlAuth;
use onionpipe_overlay::{OverlayError, OverlayResult};
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

const EVENT_CODE: u16 = 650;

/// Commands whose arguments carry secrets; only the verb is logged
const SECRET_COMMANDS: &[&str] = &["AUTHENTICATE", "ADD_ONION", "ONION_CLIENT_AUTH_ADD"];

/// One complete control port reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_event(&self) -> bool {
        self.code == EVENT_CODE
    }

    /// Value of the first `key=value` line
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }
}

pub(crate) struct ControlConnection<S> {
    stream: BufStream<S>,
    events: VecDeque<Reply>,
    trace: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ControlConnection<S> {
    pub fn new(stream: S, trace: bool) -> Self {
        ControlConnection {
            stream: BufStream::new(stream),
            events: VecDeque::new(),
            trace,
        }
    }

    pub async fn authenticate(&mut self, auth: &ControlAuth) -> OverlayResult<()> {
        let command = match auth {
            ControlAuth::Null => "AUTHENTICATE".to_string(),
            ControlAuth::Password(password) => format!("AUTHENTICATE {}", quote(password)),
            ControlAuth::Cookie(path) => {
                let cookie = tokio::fs::read(path).await.map_err(|e| {
                    OverlayError::Control(format!(
                        "failed to read cookie {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
        };
        self.command(&command).await?;
        Ok(())
    }

    /// Send a command and return its reply, failing on a non-2xx code
    pub async fn command(&mut self, line: &str) -> OverlayResult<Reply> {
        self.write_line(line).await?;
        loop {
            let reply = self.read_reply().await?;
            if reply.is_event() {
                self.events.push_back(reply);
                continue;
            }
            if !reply.is_ok() {
                return Err(OverlayError::Rejected {
                    command: verb(line).to_string(),
                    code: reply.code,
                    message: reply.lines.join(" "),
                });
            }
            return Ok(reply);
        }
    }

    /// Next asynchronous event, queued or read from the connection
    pub async fn next_event(&mut self) -> OverlayResult<Reply> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }
        loop {
            let reply = self.read_reply().await?;
            if reply.is_event() {
                return Ok(reply);
            }
            debug!(code = reply.code, "Ignoring unsolicited reply");
        }
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    async fn write_line(&mut self, line: &str) -> OverlayResult<()> {
        if self.trace {
            if SECRET_COMMANDS.contains(&verb(line)) {
                debug!(">> {} ...", verb(line));
            } else {
                debug!(">> {}", line);
            }
        }
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> OverlayResult<String> {
        let mut buf = String::new();
        if self.stream.read_line(&mut buf).await? == 0 {
            return Err(OverlayError::Closed);
        }
        let line = buf.trim_end_matches(['\r', '\n']).to_string();
        if self.trace {
            debug!("<< {}", line);
        }
        Ok(line)
    }

    async fn read_reply(&mut self) -> OverlayResult<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            let bytes = line.as_bytes();
            if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
                return Err(malformed(&line));
            }
            let code: u16 = line[..3].parse().map_err(|_| malformed(&line))?;
            let separator = bytes[3];
            if !matches!(separator, b' ' | b'-' | b'+') {
                return Err(malformed(&line));
            }
            lines.push(line[4..].to_string());

            match separator {
                b' ' => return Ok(Reply { code, lines }),
                b'+' => loop {
                    let data = self.read_line().await?;
                    if data == "." {
                        break;
                    }
                    let data = data.strip_prefix('.').unwrap_or(&data);
                    lines.push(data.to_string());
                },
                _ => {}
            }
        }
    }
}

fn verb(line: &str) -> &str {
    line.split(' ').next().unwrap_or(line)
}

fn malformed(line: &str) -> OverlayError {
    OverlayError::Control(format!("malformed reply line {:?}", line))
}

/// Quoted string argument with backslash escapes
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
