//! In-process overlay.
//!
//! A [`MemoryNetwork`] is a shared hub; each node joins it to obtain a
//! [`MemoryOverlay`]. Publishes fan out to every subscriber of the topic in
//! publish order, including the publisher itself. Local echoes are left for the
//! party bus to filter.
//!
//! Dials succeed only when the target has joined the hub and has not been marked
//! unreachable, which lets tests model partially reachable peer sets.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, Overlay, OverlayError, PeerAddr, TopicSubscription};

#[derive(Default)]
struct NetworkState {
    members: HashSet<PeerId>,
    unreachable: HashSet<PeerId>,
    subscriptions: HashMap<String, Vec<(PeerId, mpsc::UnboundedSender<InboundMessage>)>>,
    dial_attempts: HashMap<PeerId, usize>,
    connections: HashSet<(PeerId, PeerId)>,
}

/// Shared in-process hub.
///
/// Clone is cheap; all clones refer to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a node on the hub.
    pub fn join(&self, peer_id: PeerId, cancel: CancellationToken) -> MemoryOverlay {
        self.lock().members.insert(peer_id);
        MemoryOverlay {
            network: self.clone(),
            peer_id,
            cancel,
        }
    }

    /// Mark a peer as (un)reachable for subsequent dials.
    pub fn set_unreachable(&self, peer_id: PeerId, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(peer_id);
        } else {
            state.unreachable.remove(&peer_id);
        }
    }

    /// Number of dials made towards a peer, successful or not.
    pub fn dial_attempts(&self, peer_id: &PeerId) -> usize {
        self.lock().dial_attempts.get(peer_id).copied().unwrap_or(0)
    }

    /// Total number of dials made on the hub.
    pub fn total_dial_attempts(&self) -> usize {
        self.lock().dial_attempts.values().sum()
    }

    /// Whether `from` has successfully dialed `to`.
    pub fn is_connected(&self, from: &PeerId, to: &PeerId) -> bool {
        self.lock().connections.contains(&(*from, *to))
    }

    /// Deliver a raw message to every subscriber of a topic, bypassing publish.
    ///
    /// Returns the number of subscribers reached.
    pub fn inject(&self, topic: &str, message: InboundMessage) -> usize {
        self.deliver(topic, &message)
    }

    fn deliver(&self, topic: &str, message: &InboundMessage) -> usize {
        let mut state = self.lock();
        let Some(subscribers) = state.subscriptions.get_mut(topic) else {
            return 0;
        };

        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers
            .iter()
            .filter(|(_, tx)| tx.send(message.clone()).is_ok())
            .count()
    }
}

/// A node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryOverlay {
    network: MemoryNetwork,
    peer_id: PeerId,
    cancel: CancellationToken,
}

struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    cancel: CancellationToken,
}

#[async_trait]
impl TopicSubscription for MemorySubscription {
    async fn next(&mut self) -> Result<InboundMessage, OverlayError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(OverlayError::Closed),
            message = self.rx.recv() => message.ok_or(OverlayError::Closed),
        }
    }
}

#[async_trait]
impl Overlay for MemoryOverlay {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn connect(&self, peer: &PeerAddr) -> Result<(), OverlayError> {
        if self.cancel.is_cancelled() {
            return Err(OverlayError::Closed);
        }

        let target = peer.peer_id();
        let mut state = self.network.lock();
        *state.dial_attempts.entry(target).or_insert(0) += 1;

        if !state.members.contains(&target) || state.unreachable.contains(&target) {
            return Err(OverlayError::Dial {
                peer: target,
                reason: "peer unreachable".to_string(),
            });
        }

        state.connections.insert((self.peer_id, target));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicSubscription>, OverlayError> {
        if self.cancel.is_cancelled() {
            return Err(OverlayError::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.network
            .lock()
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .push((self.peer_id, tx));

        Ok(Box::new(MemorySubscription {
            rx,
            cancel: self.cancel.clone(),
        }))
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), OverlayError> {
        if self.cancel.is_cancelled() {
            return Err(OverlayError::Closed);
        }

        let message = InboundMessage {
            data,
            source: Some(self.peer_id),
        };
        self.network.deliver(topic, &message);
        Ok(())
    }

    async fn list_peers(&self, topic: &str) -> Vec<PeerId> {
        let state = self.network.lock();
        let mut peers: Vec<PeerId> = state
            .subscriptions
            .get(topic)
            .into_iter()
            .flatten()
            .filter(|(peer_id, tx)| *peer_id != self.peer_id && !tx.is_closed())
            .map(|(peer_id, _)| *peer_id)
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }
}
