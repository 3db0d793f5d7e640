// Crate-level lint configuration
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., NodeError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs

//! Party Node
//!
//! Bootstraps a peer in a private peer-to-peer network that coordinates a
//! multi-party signing operation.
//!
//! ## Architecture
//!
//! - **Identity** (`identity`): generates or loads the node's long-term ed25519 key
//!   and derives its libp2p peer id.
//! - **Peer connector** (`peers`): reads a static peer list and drives the node to a
//!   fully-connected state, retrying whole passes at a fixed interval.
//! - **Party bus** (`bus`): joins a namespaced gossipsub topic and exposes inbound
//!   party messages as an ordered, self-filtered stream.
//! - **Overlay** (`overlay`): the transport capability the bus and connector run on
//!   (libp2p in production, an in-process hub for tests).
//! - **Request endpoint** (`routes`): loopback JSON-RPC over HTTP for `ping` and
//!   `sign`. Signing itself is not implemented and always reports so.
//!
//! Threshold-signature cryptography is out of scope; this crate is the networking
//! and identity substrate such a protocol would run on.

pub mod bus;
pub mod config;
pub mod error;
pub mod identity;
pub mod node;
pub mod overlay;
pub mod peers;
pub mod repo;
pub mod routes;
pub mod signer;

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Stub telemetry module when OpenTelemetry is disabled.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    /// Initialize tracing with console output only.
    pub fn init_tracing() {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "party_node=info,actix_web=info,libp2p_gossipsub=warn".into());
        let fmt_layer = tracing_subscriber::fmt::layer();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    /// No-op shutdown when OpenTelemetry is disabled.
    pub fn shutdown_tracing() {}
}

// Re-export commonly used types
pub use bus::{PartyBus, PartyMessage};
pub use config::Settings;
pub use error::{NodeError, NodeResult};
pub use identity::{Identity, IdentityStore};
pub use peers::{ConnectState, PeerConnector, RetryPolicy};
