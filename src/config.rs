//! Configuration module for sequence-relay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::backend::{parser, Limits, RangeRequest};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Port the back end listens on when an address carries no port.
pub const DEFAULT_BACKEND_PORT: u16 = 3215;

/// Port the relay front end listens on by default.
pub const DEFAULT_RELAY_PORT: u16 = 3216;

/// Reply cap for the relay; covers the longest reply the default limits allow.
pub const DEFAULT_RESPONSE_LIMIT: usize = 128 * 1024;

/// Which half of the relay this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Front end: holds the client connection and forwards to the back end.
    #[default]
    Relay,
    /// Back end: validates requests and calls the sequence service.
    Backend,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sequence-relay")]
#[command(author = "sequence-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A two-hop TCP relay for random integer sequences", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Role to run (relay or backend)
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Address to bind to (e.g., 0.0.0.0:3216)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Back-end address for the relay (host or host:port)
    #[arg(short = 'b', long, env = "RANDOM_SERVER")]
    pub backend: Option<String>,

    /// Number of back-end worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay (front end) configuration
#[derive(Debug, Deserialize)]
pub struct RelaySection {
    /// Address to bind to
    #[serde(default = "default_relay_listen")]
    pub listen: String,
    /// Back-end address
    #[serde(default = "default_backend_addr")]
    pub backend: String,
    /// How long to wait for the back end's reply
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// How long to wait for the back-end connection to open
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum bytes taken from one client read
    #[serde(default = "default_read_limit")]
    pub read_limit: usize,
    /// Maximum bytes accepted from the back end per request
    #[serde(default = "default_response_limit")]
    pub response_limit: usize,
    /// Fixed request sent on every round instead of the client's input
    pub preset: Option<PresetConfig>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            listen: default_relay_listen(),
            backend: default_backend_addr(),
            receive_timeout_ms: default_receive_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_limit: default_read_limit(),
            response_limit: default_response_limit(),
            preset: None,
        }
    }
}

/// Preset request values
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PresetConfig {
    pub min: u64,
    pub max: u64,
    pub cols: u64,
}

/// Back-end configuration
#[derive(Debug, Deserialize)]
pub struct BackendSection {
    /// Address to bind to
    #[serde(default = "default_backend_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of connections handled at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum bytes taken from one request read
    #[serde(default = "default_read_limit")]
    pub read_limit: usize,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            listen: default_backend_listen(),
            workers: None,
            max_connections: default_max_connections(),
            read_limit: default_read_limit(),
        }
    }
}

/// External sequence service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Endpoint queried with min, max and col parameters
    #[serde(default = "default_provider_url")]
    pub url: String,
    /// Whole-request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: default_provider_url(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_relay_listen() -> String {
    format!("0.0.0.0:{DEFAULT_RELAY_PORT}")
}

fn default_backend_listen() -> String {
    format!("0.0.0.0:{DEFAULT_BACKEND_PORT}")
}

fn default_backend_addr() -> String {
    format!("127.0.0.1:{DEFAULT_BACKEND_PORT}")
}

fn default_receive_timeout_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_read_limit() -> usize {
    1024
}

fn default_response_limit() -> usize {
    DEFAULT_RESPONSE_LIMIT
}

fn default_max_connections() -> usize {
    64
}

fn default_provider_url() -> String {
    "https://www.random.org/sequences/".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: String,
    pub backend: String,
    pub receive_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_limit: usize,
    pub response_limit: usize,
    pub preset: Option<RangeRequest>,
}

/// Resolved back-end settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub listen: String,
    pub max_connections: usize,
    pub read_limit: usize,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub relay: RelayConfig,
    pub backend: BackendConfig,
    pub provider: ProviderConfig,
    pub limits: Limits,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mode = cli.mode.or(toml_config.mode).unwrap_or_default();
        let limits = toml_config.limits;
        let relay = toml_config.relay;
        let backend = toml_config.backend;

        // --listen applies to whichever role is running
        let (relay_listen, backend_listen) = match (mode, cli.listen) {
            (Mode::Relay, Some(listen)) => (listen, backend.listen),
            (Mode::Backend, Some(listen)) => (relay.listen, listen),
            (_, None) => (relay.listen, backend.listen),
        };

        let backend_addr = with_default_port(
            cli.backend.as_deref().unwrap_or(&relay.backend),
            DEFAULT_BACKEND_PORT,
        )?;

        let preset = relay
            .preset
            .map(|p| {
                parser::parse(&format!("{},{},{}", p.min, p.max, p.cols), &limits)
                    .map_err(|e| ConfigError::InvalidValue("relay.preset", e.to_string()))
            })
            .transpose()?;

        if relay.read_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "relay.read_limit",
                "must be at least 1".to_string(),
            ));
        }
        if backend.read_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "backend.read_limit",
                "must be at least 1".to_string(),
            ));
        }
        if (relay.response_limit as u64) < limits.max_reply_len() {
            return Err(ConfigError::InvalidValue(
                "relay.response_limit",
                format!(
                    "{} bytes cannot hold a {}-byte reply allowed by [limits]",
                    relay.response_limit,
                    limits.max_reply_len()
                ),
            ));
        }
        if backend.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "backend.max_connections",
                "must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            mode,
            relay: RelayConfig {
                listen: relay_listen,
                backend: backend_addr,
                receive_timeout: Duration::from_millis(relay.receive_timeout_ms),
                connect_timeout: Duration::from_millis(relay.connect_timeout_ms),
                read_limit: relay.read_limit,
                response_limit: relay.response_limit,
                preset,
            },
            backend: BackendConfig {
                listen: backend_listen,
                max_connections: backend.max_connections,
                read_limit: backend.read_limit,
            },
            provider: toml_config.provider,
            limits,
            workers: cli.workers.or(backend.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Append `port` to an address that names only a host.
fn with_default_port(addr: &str, port: u16) -> Result<String, ConfigError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ConfigError::InvalidValue(
            "relay.backend",
            "address is empty".to_string(),
        ));
    }
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(addr.to_string());
    }
    if let Ok(ip) = addr.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port).to_string());
    }
    match addr.rsplit_once(':') {
        Some((host, p)) if !host.is_empty() && p.parse::<u16>().is_ok() => Ok(addr.to_string()),
        Some(_) => Err(ConfigError::InvalidValue(
            "relay.backend",
            format!("invalid address '{addr}'"),
        )),
        None => Ok(format!("{addr}:{port}")),
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid value for '{0}': {1}")]
    InvalidValue(&'static str, String),
}
