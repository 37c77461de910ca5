//! TCP server for back-end connections.
//!
//! Accepts connections from the relay and hands each to the request handler
//! in its own task.

use crate::config::BackendConfig;
use crate::error::ServerError;
use crate::net::bind_listener;
use crate::provider::SequenceProvider;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::handler::handle_connection;
use super::parser::Limits;

/// Back-end server instance
pub struct BackendServer {
    listen: String,
    read_limit: usize,
    limits: Limits,
    provider: Arc<dyn SequenceProvider>,
    connection_limit: Arc<Semaphore>,
}

impl BackendServer {
    /// Create a new server instance
    pub fn new(
        config: &BackendConfig,
        limits: Limits,
        provider: Arc<dyn SequenceProvider>,
    ) -> Self {
        BackendServer {
            listen: config.listen.clone(),
            read_limit: config.read_limit,
            limits,
            provider,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        }
    }

    /// Bind the configured address and serve forever
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = bind_listener(&self.listen).await?;
        info!(address = %self.listen, "Backend listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            // Wait for a connection slot
            let permit = match self.connection_limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                // the semaphore is never closed
                Err(_) => return Ok(()),
            };

            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "Got connection");

                    let provider = Arc::clone(&self.provider);
                    let limits = self.limits;
                    let read_limit = self.read_limit;

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, provider.as_ref(), &limits, read_limit).await
                        {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(provider: Arc<StubProvider>) -> SocketAddr {
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

    async fn request(addr: SocketAddr, payload: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_valid_request_over_tcp() {
        let provider = Arc::new(StubProvider::replying("7\n3\n5\n"));
        let addr = start(provider.clone()).await;

        assert_eq!(request(addr, "3,7,1\n").await, "7\n3\n5\n");
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_same_request_twice_calls_provider_twice() {
        let provider = Arc::new(StubProvider::replying("1\t2\n"));
        let addr = start(provider.clone()).await;

        let first = request(addr, "1,2,2").await;
        let second = request(addr, "1,2,2").await;
        assert_eq!(first, second);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_over_tcp() {
        let provider = Arc::new(StubProvider::replying("unused"));
        let addr = start(provider.clone()).await;

        assert_eq!(
            request(addr, "5,3,2").await,
            "Data not in correct format min > max"
        );
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_keeps_serving_after_failures() {
        let provider = Arc::new(StubProvider::replying("42\n"));
        let addr = start(provider.clone()).await;

        // a caller that connects and leaves without sending anything
        drop(TcpStream::connect(addr).await.unwrap());

        // a caller that closes its write half without a request
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "No data received");

        assert_eq!(request(addr, "40,45,1").await, "42\n");
    }
}
