//! Relay session manager.
//!
//! Serves one client at a time. The outer loop accepts a client; the inner
//! loop probes it, prompts, reads a request, relays it to the back end over
//! a fresh connection and forwards the reply. A vanished client is replaced
//! by accepting again on the same listener. A failed back-end round is
//! abandoned and the client simply gets the next prompt.

use bytes::{Bytes, BytesMut};
use std::convert::Infallible;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::liveness::is_alive;
use super::upstream::{RelayOutcome, Upstream};
use crate::backend::RangeRequest;
use crate::config::RelayConfig;
use crate::error::ServerError;
use crate::net::bind_listener;

/// Prompt asking the client for a request.
pub const PROMPT: &[u8] = b"\nEnter 3 numbers min,max,cols separated by commas: ";

/// Prompt used when requests come from the preset.
pub const PRESET_PROMPT: &[u8] = b"\nPress [Enter] to get a new set of values: ";

/// Single-client relay front end
pub struct RelaySession {
    listen: String,
    upstream: Upstream,
    read_limit: usize,
    preset: Option<RangeRequest>,
}

impl RelaySession {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            listen: config.listen.clone(),
            upstream: Upstream::new(config),
            read_limit: config.read_limit,
            preset: config.preset,
        }
    }

    /// Bind the configured address and serve until a fatal error.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = bind_listener(&self.listen).await?;
        info!(
            address = %self.listen,
            backend = %self.upstream.addr(),
            preset = ?self.preset.map(|p| p.to_string()),
            "Relay listening"
        );
        self.serve(&listener).await
    }

    /// Outer loop: accept a client and run its session. Only accept
    /// failures end the loop.
    pub async fn serve(&self, listener: &TcpListener) -> Result<(), ServerError> {
        loop {
            let client = accept(listener).await?;

            match self.session(listener, client).await {
                Ok(never) => match never {},
                Err(e @ ServerError::Accept(_)) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Client session failed - waiting for new connections");
                }
            }
        }
    }

    /// Inner loop for one client connection, replaced in place when the
    /// liveness probe finds it gone.
    async fn session(
        &self,
        listener: &TcpListener,
        mut client: TcpStream,
    ) -> Result<Infallible, ServerError> {
        let mut input = BytesMut::with_capacity(self.read_limit);

        loop {
            if !is_alive(&client) {
                info!("Connection closed - waiting for new connections");
                client = accept(listener).await?;
            }

            let Some(payload) = self.next_request(&mut client, &mut input).await? else {
                continue;
            };

            match self.upstream.exchange(&payload).await {
                RelayOutcome::Response(reply) => {
                    debug!(bytes = reply.len(), "Forwarding backend reply");
                    client
                        .write_all(&reply)
                        .await
                        .map_err(ServerError::Client)?;
                }
                RelayOutcome::Timeout => {
                    warn!(backend = %self.upstream.addr(), "Timed out waiting for backend reply");
                }
                RelayOutcome::Unavailable(e) => {
                    warn!(backend = %self.upstream.addr(), error = %e, "Backend unavailable");
                }
                RelayOutcome::Unknown(reason) => {
                    error!(backend = %self.upstream.addr(), %reason, "Relay round failed");
                }
            }
        }
    }

    /// Prompt the client and produce the payload for the back end. `None`
    /// means the client read came back empty and the round is skipped.
    async fn next_request(
        &self,
        client: &mut TcpStream,
        input: &mut BytesMut,
    ) -> Result<Option<Bytes>, ServerError> {
        let prompt = if self.preset.is_some() {
            PRESET_PROMPT
        } else {
            PROMPT
        };
        client.write_all(prompt).await.map_err(ServerError::Client)?;

        input.clear();
        input.resize(self.read_limit, 0);
        let n = client.read(input).await.map_err(ServerError::Client)?;
        if n == 0 {
            debug!("Client read returned no data");
            return Ok(None);
        }
        input.truncate(n);

        let Some(request) = self.preset else {
            debug!(data = %String::from_utf8_lossy(input).trim(), "Relaying client request");
            return Ok(Some(Bytes::copy_from_slice(input)));
        };

        let values = request.to_string();
        let notice =
            format!("Will send these values to server: {values}\nWaiting for server response...\n");
        client
            .write_all(notice.as_bytes())
            .await
            .map_err(ServerError::Client)?;
        debug!(%values, "Relaying preset request");
        Ok(Some(Bytes::from(values)))
    }
}

async fn accept(listener: &TcpListener) -> Result<TcpStream, ServerError> {
    let (stream, addr) = listener.accept().await.map_err(ServerError::Accept)?;
    info!(peer = %addr, "Got connection");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendServer, Limits};
    use crate::config::{BackendConfig, DEFAULT_RESPONSE_LIMIT};
    use crate::provider::stub::StubProvider;
    use socket2::SockRef;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const STEP: Duration = Duration::from_secs(5);

    fn relay_config(backend: SocketAddr, preset: Option<RangeRequest>) -> RelayConfig {
        RelayConfig {
            listen: "127.0.0.1:0".to_string(),
            backend: backend.to_string(),
            receive_timeout: Duration::from_millis(300),
            connect_timeout: Duration::from_secs(1),
            read_limit: 1024,
            response_limit: DEFAULT_RESPONSE_LIMIT,
            preset,
        }
    }

    /// Start a relay in front of `backend`, returning the relay's address.
    async fn start_relay(backend: SocketAddr, preset: Option<RangeRequest>) -> SocketAddr {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let session = RelaySession::new(&relay_config(backend, preset));
        tokio::spawn(async move { session.serve(&listener).await });
        addr
    }

    async fn start_backend(provider: Arc<StubProvider>) -> SocketAddr {
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = BackendConfig {
            listen: addr.to_string(),
            max_connections: 4,
            read_limit: 1024,
        };
        let server = BackendServer::new(&config, Limits::default(), provider);
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    async fn expect(stream: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(STEP, stream.read_exact(&mut buf))
            .await
            .expect("timed out waiting for relay")
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    async fn unused_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_relays_backend_reply() {
        let provider = Arc::new(StubProvider::replying("8\n2\n5\n"));
        let relay = start_relay(start_backend(provider.clone()).await, None).await;

        let mut client = TcpStream::connect(relay).await.unwrap();
        expect(&mut client, PROMPT).await;
        client.write_all(b"2,8,1\n").await.unwrap();
        expect(&mut client, b"8\n2\n5\n").await;
        expect(&mut client, PROMPT).await;

        client.write_all(b"5,3,2").await.unwrap();
        expect(&mut client, b"Data not in correct format min > max").await;
        expect(&mut client, PROMPT).await;

        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_reprompts() {
        let relay = start_relay(unused_addr().await, None).await;

        let mut client = TcpStream::connect(relay).await.unwrap();
        expect(&mut client, PROMPT).await;
        client.write_all(b"1,2,3").await.unwrap();
        // nothing forwarded, just the next prompt
        expect(&mut client, PROMPT).await;

        // the session survives the failed round
        client.write_all(b"1,2,3").await.unwrap();
        expect(&mut client, PROMPT).await;
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = backend.accept().await {
                held.push(stream);
            }
        });
        let relay = start_relay(backend_addr, None).await;

        let mut client = TcpStream::connect(relay).await.unwrap();
        expect(&mut client, PROMPT).await;

        let started = Instant::now();
        client.write_all(b"1,2,3").await.unwrap();
        expect(&mut client, PROMPT).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_replaces_disconnected_client() {
        let provider = Arc::new(StubProvider::replying("1\n"));
        let relay = start_relay(start_backend(provider.clone()).await, None).await;

        let mut first = TcpStream::connect(relay).await.unwrap();
        expect(&mut first, PROMPT).await;
        drop(first);

        let mut second = TcpStream::connect(relay).await.unwrap();
        expect(&mut second, PROMPT).await;
        second.write_all(b"1,1,1").await.unwrap();
        expect(&mut second, b"1\n").await;
        expect(&mut second, PROMPT).await;
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_recovers_from_client_reset() {
        let provider = Arc::new(StubProvider::replying("1\n"));
        let relay = start_relay(start_backend(provider.clone()).await, None).await;

        let mut first = TcpStream::connect(relay).await.unwrap();
        expect(&mut first, PROMPT).await;
        // let the relay block in its read, then abort with RST instead of FIN
        tokio::time::sleep(Duration::from_millis(50)).await;
        SockRef::from(&first)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(first);

        let mut second = TcpStream::connect(relay).await.unwrap();
        expect(&mut second, PROMPT).await;
        second.write_all(b"1,1,1").await.unwrap();
        expect(&mut second, b"1\n").await;
        expect(&mut second, PROMPT).await;
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_preset_request() {
        let provider = Arc::new(StubProvider::replying("3\t7\n"));
        let preset = RangeRequest {
            min: 1,
            max: 10,
            cols: 2,
        };
        let relay = start_relay(start_backend(provider.clone()).await, Some(preset)).await;

        let mut client = TcpStream::connect(relay).await.unwrap();
        expect(&mut client, PRESET_PROMPT).await;
        client.write_all(b"\n").await.unwrap();
        expect(
            &mut client,
            b"Will send these values to server: 1,10,2\nWaiting for server response...\n",
        )
        .await;
        expect(&mut client, b"3\t7\n").await;
        expect(&mut client, PRESET_PROMPT).await;

        assert_eq!(provider.calls(), vec![preset]);
    }
}
