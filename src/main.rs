//! sequence-relay: a two-hop TCP relay for random integer sequences
//!
//! The same binary runs either half:
//! - `relay`: holds one client connection, prompts for `min,max,cols` and
//!   forwards each request to the back end over a fresh connection
//! - `backend`: validates requests and answers them from an external
//!   random sequence service
//!
//! Features:
//! - Transparent replacement of a disconnected client
//! - Back-end timeouts and outages skip a round instead of ending the session
//! - Configuration via CLI arguments, environment or TOML file

mod backend;
mod config;
mod error;
mod net;
mod provider;
mod relay;

use backend::BackendServer;
use config::{Config, Mode};
use provider::RandomOrgProvider;
use relay::RelaySession;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(mode = ?config.mode, "Starting sequence-relay");

    match config.mode {
        Mode::Relay => run_relay(config),
        Mode::Backend => run_backend(config),
    }
}

/// Run the relay front end on a single-threaded runtime
fn run_relay(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.relay.listen,
        backend = %config.relay.backend,
        receive_timeout_ms = config.relay.receive_timeout.as_millis() as u64,
        "Using relay mode"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let session = RelaySession::new(&config.relay);

    runtime.block_on(until_shutdown(session.run(), shutdown_signal()))?;
    Ok(())
}

/// Run the back end on a multi-threaded runtime
fn run_backend(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.backend.listen,
        provider = %config.provider.url,
        max_connections = config.backend.max_connections,
        "Using backend mode"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    let provider = Arc::new(RandomOrgProvider::new(&config.provider)?);
    let server = BackendServer::new(&config.backend, config.limits, provider);

    runtime.block_on(until_shutdown(server.run(), shutdown_signal()))?;
    Ok(())
}

/// Drive `serve` until it fails or `shutdown` completes. On shutdown the
/// serving future is dropped, which closes every socket it owns.
async fn until_shutdown<F, S, E>(serve: F, shutdown: S) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
    S: Future<Output = ()>,
{
    tokio::select! {
        result = serve => result,
        () = shutdown => {
            info!("Closing sockets");
            Ok(())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
