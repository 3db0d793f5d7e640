//! Node configuration derived from command-line flags.
//!
//! Every flag has an environment variable fallback so the node can be configured
//! the same way under a process supervisor. Parse failures are reported by clap
//! and exit non-zero before anything else starts.
//!
//! ## Flags
//!
//! - `--address` / `PARTY_NODE_ADDRESS`: overlay listen address (default: 0.0.0.0)
//! - `--port` / `PARTY_NODE_PORT`: overlay listen port (default: 4001)
//! - `--http-host` / `PARTY_NODE_HTTP_HOST`: JSON-RPC bind address (default: 127.0.0.1)
//! - `--http-port` / `PARTY_NODE_HTTP_PORT`: JSON-RPC port (default: 5000)
//! - `--key-path` / `PARTY_NODE_KEY_PATH`: private key file (default: `<repo>/private_key.pem`)
//! - `--peer-list` / `PARTY_NODE_PEER_LIST`: file of peer multiaddrs, one per line
//! - `--repo` / `PARTY_NODE_REPO`: working directory (default: `~/.party-node`)
//! - `--topic` / `PARTY_NODE_TOPIC`: signing party topic (default: fete)
//! - `--retry-interval-secs` / `PARTY_NODE_RETRY_INTERVAL_SECS`: delay between
//!   connection passes (default: 10)
//! - `--max-connect-attempts` / `PARTY_NODE_MAX_CONNECT_ATTEMPTS`: give up after this
//!   many passes (default: never)
//! - `RUST_LOG`: Log level filter

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use libp2p::Multiaddr;
use libp2p::multiaddr::Protocol;

use crate::error::{NodeError, NodeResult};
use crate::peers::RetryPolicy;

// Defaults
const DEFAULT_LISTEN_PORT: u16 = 4001;
const DEFAULT_HTTP_PORT: u16 = 5000;
const DEFAULT_TOPIC: &str = "fete";
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;

/// Command-line interface.
#[derive(Parser, Debug, Clone)]
#[command(name = "party-node")]
#[command(about = "Peer bootstrap for a private threshold-signing party network")]
#[command(version)]
pub struct Cli {
    /// Node host listen address
    #[arg(long, env = "PARTY_NODE_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub address: IpAddr,

    /// Node listen port
    #[arg(long, env = "PARTY_NODE_PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,

    /// JSON-RPC listen address
    #[arg(long, env = "PARTY_NODE_HTTP_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub http_host: IpAddr,

    /// JSON-RPC listen port
    #[arg(long, env = "PARTY_NODE_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Private key path
    #[arg(long, env = "PARTY_NODE_KEY_PATH")]
    pub key_path: Option<String>,

    /// Path to file containing peer multiaddrs
    #[arg(long, env = "PARTY_NODE_PEER_LIST")]
    pub peer_list: Option<String>,

    /// Repository for application storage
    #[arg(long, env = "PARTY_NODE_REPO")]
    pub repo: Option<String>,

    /// PubSub topic for signing parties
    #[arg(long, env = "PARTY_NODE_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Seconds to wait between peer connection passes
    #[arg(long, env = "PARTY_NODE_RETRY_INTERVAL_SECS", default_value_t = DEFAULT_RETRY_INTERVAL_SECS)]
    pub retry_interval_secs: u64,

    /// Give up after this many connection passes (retries forever when unset)
    #[arg(long, env = "PARTY_NODE_MAX_CONNECT_ATTEMPTS")]
    pub max_connect_attempts: Option<u32>,
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    listen_address: IpAddr,
    listen_port: u16,
    http_host: IpAddr,
    http_port: u16,
    key_path: Option<PathBuf>,
    peer_list: Option<PathBuf>,
    repo: Option<PathBuf>,
    topic: String,
    retry_interval: Duration,
    max_connect_attempts: Option<u32>,
}

/// Treat an empty path flag the same as an absent one.
fn non_empty(path: Option<String>) -> Option<PathBuf> {
    path.filter(|p| !p.is_empty()).map(PathBuf::from)
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Self {
            listen_address: cli.address,
            listen_port: cli.port,
            http_host: cli.http_host,
            http_port: cli.http_port,
            key_path: non_empty(cli.key_path),
            peer_list: non_empty(cli.peer_list),
            repo: non_empty(cli.repo),
            topic: cli.topic.trim().to_string(),
            retry_interval: Duration::from_secs(cli.retry_interval_secs),
            max_connect_attempts: cli.max_connect_attempts,
        }
    }
}

impl Settings {
    /// Load settings from the process arguments and environment.
    pub fn from_args() -> Self {
        Cli::parse().into()
    }

    /// Create settings for tests, rooted at the given repo directory.
    pub fn for_tests(repo: &Path) -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 0,
            http_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            key_path: None,
            peer_list: None,
            repo: Some(repo.to_path_buf()),
            topic: DEFAULT_TOPIC.to_string(),
            retry_interval: Duration::from_millis(50),
            max_connect_attempts: Some(3),
        }
    }

    /// Validate settings.
    pub fn validate(&self) -> NodeResult<()> {
        if self.topic.is_empty() {
            return Err(NodeError::Config(
                "Topic must not be empty. Set --topic or PARTY_NODE_TOPIC.".to_string(),
            ));
        }

        if self.retry_interval.is_zero() {
            return Err(NodeError::Config(
                "Retry interval must be at least one second.".to_string(),
            ));
        }

        if self.max_connect_attempts == Some(0) {
            return Err(NodeError::Config(
                "Max connect attempts must be greater than zero when set.".to_string(),
            ));
        }

        Ok(())
    }

    // Getters

    /// Overlay listen multiaddr, e.g. `/ip4/0.0.0.0/tcp/4001`.
    pub fn listen_multiaddr(&self) -> Multiaddr {
        Multiaddr::empty()
            .with(Protocol::from(self.listen_address))
            .with(Protocol::Tcp(self.listen_port))
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_host, self.http_port)
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }

    pub fn peer_list(&self) -> Option<&Path> {
        self.peer_list.as_deref()
    }

    pub fn repo(&self) -> Option<&Path> {
        self.repo.as_deref()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: self.retry_interval,
            max_attempts: self.max_connect_attempts,
        }
    }

    pub fn with_peer_list(mut self, path: Option<PathBuf>) -> Self {
        self.peer_list = path.filter(|p| !p.as_os_str().is_empty());
        self
    }
}
