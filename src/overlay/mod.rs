//! Overlay transport capability.
//!
//! The party bus and peer connector only need four primitives from the network:
//! dial a peer, subscribe to a topic, publish to a topic, and list a topic's peers.
//! Implementations:
//! - `gossip`: libp2p TCP + noise + yamux with gossipsub topics (production)
//! - `memory`: in-process hub for tests and single-process demos

pub mod gossip;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use thiserror::Error;

pub use self::gossip::Libp2pOverlay;
pub use self::memory::{MemoryNetwork, MemoryOverlay};

/// Transport-level errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("Overlay is shut down")]
    Closed,

    #[error("Dial to {peer} failed: {reason}")]
    Dial { peer: PeerId, reason: String },

    #[error("Dial to {0} timed out")]
    DialTimeout(PeerId),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A peer's dialable address: a multiaddr ending in `/p2p/<peer-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    addr: Multiaddr,
    peer_id: PeerId,
}

impl PeerAddr {
    /// Full multiaddr including the `/p2p` component.
    pub fn addr(&self) -> &Multiaddr {
        &self.addr
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

impl FromStr for PeerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: Multiaddr = s.trim().parse().map_err(|e| format!("{e}"))?;

        let peer_id = addr
            .iter()
            .find_map(|protocol| match protocol {
                Protocol::P2p(peer_id) => Some(peer_id),
                _ => None,
            })
            .ok_or_else(|| "missing /p2p/<peer-id> component".to_string())?;

        Ok(Self { addr, peer_id })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Raw payload bytes.
    pub data: Vec<u8>,
    /// Peer that originated the message, when the overlay knows it.
    pub source: Option<PeerId>,
}

/// An open topic subscription. Dropping it releases the subscription.
#[async_trait]
pub trait TopicSubscription: Send {
    /// Wait for the next message. An error means the subscription is finished.
    async fn next(&mut self) -> Result<InboundMessage, OverlayError>;
}

/// Transport capability the node runs on.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// This host's peer id.
    fn local_peer_id(&self) -> PeerId;

    /// Establish a transport connection to the peer.
    async fn connect(&self, peer: &PeerAddr) -> Result<(), OverlayError>;

    /// Subscribe to a topic by its on-wire name.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicSubscription>, OverlayError>;

    /// Publish bytes on a topic by its on-wire name.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), OverlayError>;

    /// Peers currently known to be subscribed to the topic.
    async fn list_peers(&self, topic: &str) -> Vec<PeerId>;
}
