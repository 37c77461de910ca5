//! Per-request connection to the back end.
//!
//! Every relay round opens a fresh connection, sends the payload, reads the
//! reply until the back end closes, and drops the connection. The outcome
//! is a closed set the session loop switches on.

use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::RelayConfig;

/// Result of one relay round against the back end.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The back end replied; forward verbatim.
    Response(Bytes),
    /// No complete reply within the receive timeout.
    Timeout,
    /// Connection refused, reset, or never established.
    Unavailable(io::Error),
    /// Anything else.
    Unknown(String),
}

/// Back-end endpoint and the limits applied to each round.
#[derive(Debug, Clone)]
pub struct Upstream {
    addr: String,
    connect_timeout: Duration,
    receive_timeout: Duration,
    response_limit: usize,
}

impl Upstream {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            addr: config.backend.clone(),
            connect_timeout: config.connect_timeout,
            receive_timeout: config.receive_timeout,
            response_limit: config.response_limit,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `payload` on a new connection and collect the reply.
    pub async fn exchange(&self, payload: &[u8]) -> RelayOutcome {
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return RelayOutcome::Unavailable(e),
            Err(_) => {
                return RelayOutcome::Unavailable(io::Error::new(
                    ErrorKind::TimedOut,
                    "connect timed out",
                ))
            }
        };

        if let Err(e) = stream.write_all(payload).await {
            return classify(e);
        }

        match timeout(self.receive_timeout, read_reply(&mut stream, self.response_limit)).await {
            Ok(Ok(reply)) if reply.len() > self.response_limit => RelayOutcome::Unknown(format!(
                "response exceeds {} byte limit",
                self.response_limit
            )),
            Ok(Ok(reply)) => RelayOutcome::Response(reply),
            Ok(Err(e)) => classify(e),
            Err(_) => RelayOutcome::Timeout,
        }
    }
}

/// Read until the back end closes or one byte past `limit` has arrived, so
/// an oversized reply is distinguishable from one that fits exactly.
async fn read_reply(stream: &mut TcpStream, limit: usize) -> io::Result<Bytes> {
    let mut reply = Vec::new();
    stream
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut reply)
        .await?;
    Ok(Bytes::from(reply))
}

fn classify(e: io::Error) -> RelayOutcome {
    match e.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::AddrNotAvailable => RelayOutcome::Unavailable(e),
        ErrorKind::TimedOut => RelayOutcome::Timeout,
        _ => RelayOutcome::Unknown(e.to_string()),
    }
}
