//! Errors that end a listener loop or a client session.

use std::io;

/// Listener and session failures.
///
/// `Bind` and `Accept` are fatal. `Client` ends only the current client
/// session; the relay goes back to accepting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
    #[error("client connection failed: {0}")]
    Client(#[source] io::Error),
}
