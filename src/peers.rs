//! Static peer list and the connect-to-all retry loop.
//!
//! The node expects to be connected to every peer in its list before it takes
//! part in signing. A connection pass dials every listed peer except the node
//! itself; if any dial fails the whole pass is repeated after a fixed interval.
//!
//! ```text
//! NotAttempted → Attempting → FullyConnected
//!                    ↑   ↓
//!     (sleep) ← PartiallyConnected → GaveUp   (only with a pass cap)
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use libp2p::PeerId;
use tokio_util::sync::CancellationToken;

use crate::error::{NodeError, NodeResult};
use crate::overlay::{Overlay, PeerAddr};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// How connection passes are repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between passes.
    pub interval: Duration,
    /// Maximum number of passes; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: None,
        }
    }
}

/// Connection phase state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    NotAttempted,
    Attempting { pass: u32 },
    PartiallyConnected { pass: u32, connected: usize, total: usize },
    FullyConnected,
    GaveUp { passes: u32 },
}

/// A listed peer and whether the last pass reached it.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub address: PeerAddr,
    pub connected: bool,
}

impl PeerRecord {
    pub fn peer_id(&self) -> PeerId {
        self.address.peer_id()
    }
}

/// Read a peer list file: one multiaddr per line.
///
/// Blank lines and `#` comments are skipped. A missing path or unreadable file
/// yields an empty list.
pub fn load_peer_list(path: Option<&Path>) -> Vec<String> {
    let Some(path) = path else {
        tracing::warn!("No peer list configured, running without peers");
        return Vec::new();
    };

    match fs::read_to_string(path) {
        Ok(contents) => parse_peer_list(&contents),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read peer list, running without peers");
            Vec::new()
        }
    }
}

fn parse_peer_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Drives the node to a fully-connected state with its listed peers.
pub struct PeerConnector {
    overlay: Arc<dyn Overlay>,
    policy: RetryPolicy,
    state: ConnectState,
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerConnector {
    pub fn new(overlay: Arc<dyn Overlay>, policy: RetryPolicy) -> Self {
        Self {
            overlay,
            policy,
            state: ConnectState::NotAttempted,
            peers: HashMap::new(),
        }
    }

    pub fn state(&self) -> ConnectState {
        self.state
    }

    /// Peers from the most recent pass, self excluded.
    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Run a single connection pass.
    ///
    /// Every address is parsed first; one malformed entry fails the pass before
    /// any dial. Dial failures are logged and the remaining peers are still
    /// tried. Returns whether every non-self peer is connected.
    pub async fn connect_all(&mut self, addresses: &[String], self_id: PeerId) -> NodeResult<bool> {
        let parsed = addresses
            .iter()
            .map(|address| {
                address
                    .parse::<PeerAddr>()
                    .map_err(|reason| NodeError::InvalidPeerAddress {
                        address: address.clone(),
                        reason,
                    })
            })
            .collect::<NodeResult<Vec<_>>>()?;

        let mut all_connected = true;
        for address in parsed {
            let peer_id = address.peer_id();
            if peer_id == self_id {
                continue;
            }

            let connected = match self.overlay.connect(&address).await {
                Ok(()) => {
                    tracing::debug!(peer = %peer_id, "Connected to peer");
                    true
                }
                Err(e) => {
                    tracing::warn!(peer = %peer_id, address = %address, error = %e, "Failed to connect to peer");
                    false
                }
            };

            all_connected &= connected;
            self.peers
                .insert(peer_id, PeerRecord { address, connected });
        }

        Ok(all_connected)
    }

    /// Repeat connection passes until every peer is connected.
    ///
    /// An empty list completes immediately without dialing. A malformed address
    /// is returned as an error without retrying. Cancellation interrupts the
    /// wait between passes and returns the state reached so far.
    #[tracing::instrument(skip_all, fields(peers = addresses.len()))]
    pub async fn run(
        &mut self,
        addresses: &[String],
        cancel: &CancellationToken,
    ) -> NodeResult<ConnectState> {
        if addresses.is_empty() {
            tracing::info!("Peer list is empty, nothing to connect to");
            self.state = ConnectState::FullyConnected;
            return Ok(self.state);
        }

        let self_id = self.overlay.local_peer_id();
        let mut pass = 0u32;

        loop {
            pass += 1;
            self.state = ConnectState::Attempting { pass };
            tracing::info!(pass, peers = addresses.len(), "Connecting to peers");

            if self.connect_all(addresses, self_id).await? {
                self.state = ConnectState::FullyConnected;
                tracing::info!(peers = self.peers.len(), "Connected to all peers");
                return Ok(self.state);
            }

            let connected = self.peers.values().filter(|p| p.connected).count();
            self.state = ConnectState::PartiallyConnected {
                pass,
                connected,
                total: self.peers.len(),
            };

            if self.policy.max_attempts.is_some_and(|max| pass >= max) {
                self.state = ConnectState::GaveUp { passes: pass };
                return Err(NodeError::PeersUnreachable { attempts: pass });
            }

            tracing::info!(
                connected,
                total = self.peers.len(),
                retry_in = ?self.policy.interval,
                "Not connected to all peers, retrying"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Peer connection cancelled");
                    return Ok(self.state);
                }
                () = tokio::time::sleep(self.policy.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::MemoryNetwork;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn addr_for(peer_id: PeerId) -> String {
        format!("/ip4/127.0.0.1/tcp/4001/p2p/{peer_id}")
    }

    #[test]
    fn test_parse_peer_list_skips_blanks_and_comments() {
        let list = parse_peer_list("# party\n\n  /ip4/1.2.3.4/tcp/4001/p2p/a  \n\r\n/ip4/5.6.7.8/tcp/4001/p2p/b\n");
        assert_eq!(
            list,
            vec!["/ip4/1.2.3.4/tcp/4001/p2p/a", "/ip4/5.6.7.8/tcp/4001/p2p/b"]
        );
    }

    #[test]
    fn test_load_peer_list_missing_file_is_empty() {
        assert!(load_peer_list(None).is_empty());
        assert!(load_peer_list(Some(Path::new("/nonexistent/peers.txt"))).is_empty());
    }

    #[test]
    fn test_load_peer_list_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "/ip4/10.0.0.1/tcp/4001/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN").unwrap();
        writeln!(file).unwrap();

        assert_eq!(load_peer_list(Some(file.path())).len(), 1);
    }

    #[tokio::test]
    async fn test_self_is_never_dialed() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let other = network.join(PeerId::random(), CancellationToken::new());
        let self_id = local.local_peer_id();
        let other_id = other.local_peer_id();

        let mut connector = PeerConnector::new(Arc::new(local), RetryPolicy::default());
        let addresses = vec![addr_for(self_id), addr_for(other_id)];

        assert!(connector.connect_all(&addresses, self_id).await.unwrap());
        assert_eq!(network.dial_attempts(&self_id), 0);
        assert_eq!(network.dial_attempts(&other_id), 1);
        let records: Vec<&PeerRecord> = connector.peers().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].peer_id(), other_id);
        assert!(records[0].connected);
    }

    #[tokio::test]
    async fn test_only_self_listed_is_fully_connected() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let self_id = local.local_peer_id();

        let mut connector = PeerConnector::new(Arc::new(local), RetryPolicy::default());
        let state = connector
            .run(&[addr_for(self_id)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state, ConnectState::FullyConnected);
        assert_eq!(network.total_dial_attempts(), 0);
    }

    #[tokio::test]
    async fn test_failed_peer_does_not_stop_pass() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let up = network.join(PeerId::random(), CancellationToken::new()).local_peer_id();
        let down = PeerId::random();
        let self_id = local.local_peer_id();

        let mut connector = PeerConnector::new(Arc::new(local), RetryPolicy::default());
        let addresses = vec![addr_for(down), addr_for(up)];

        assert!(!connector.connect_all(&addresses, self_id).await.unwrap());
        assert!(network.is_connected(&self_id, &up));
        assert_eq!(network.dial_attempts(&down), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_retries_within_interval() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let down = network.join(PeerId::random(), CancellationToken::new()).local_peer_id();
        network.set_unreachable(down, true);

        let policy = RetryPolicy {
            interval: Duration::from_secs(10),
            max_attempts: None,
        };
        let mut connector = PeerConnector::new(Arc::new(local), policy);
        let addresses = vec![addr_for(down)];
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            canceller.cancel();
        });

        let state = connector.run(&addresses, &cancel).await.unwrap();

        assert!(network.dial_attempts(&down) >= 2);
        assert!(matches!(state, ConnectState::PartiallyConnected { connected: 0, total: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_becoming_reachable_completes() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let late = network.join(PeerId::random(), CancellationToken::new()).local_peer_id();
        network.set_unreachable(late, true);

        let mut connector = PeerConnector::new(Arc::new(local), RetryPolicy::default());
        let addresses = vec![addr_for(late)];

        let hub = network.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            hub.set_unreachable(late, false);
        });

        let state = connector.run(&addresses, &CancellationToken::new()).await.unwrap();

        assert_eq!(state, ConnectState::FullyConnected);
        assert_eq!(network.dial_attempts(&late), 3);
        assert!(connector.peers().all(|p| p.connected));
    }

    #[tokio::test]
    async fn test_malformed_address_is_fatal_and_not_retried() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let other = network.join(PeerId::random(), CancellationToken::new()).local_peer_id();

        let mut connector = PeerConnector::new(Arc::new(local), RetryPolicy::default());
        let addresses = vec![addr_for(other), "/ip4/10.0.0.1/tcp/4001".to_string()];

        let result = connector.run(&addresses, &CancellationToken::new()).await;

        assert!(matches!(result, Err(NodeError::InvalidPeerAddress { .. })));
        assert_eq!(network.total_dial_attempts(), 0);
    }

    #[tokio::test]
    async fn test_empty_list_is_immediately_connected() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());

        let mut connector = PeerConnector::new(Arc::new(local), RetryPolicy::default());
        assert_eq!(connector.state(), ConnectState::NotAttempted);

        let state = connector.run(&[], &CancellationToken::new()).await.unwrap();

        assert_eq!(state, ConnectState::FullyConnected);
        assert_eq!(network.total_dial_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_policy_gives_up() {
        let network = MemoryNetwork::new();
        let local = network.join(PeerId::random(), CancellationToken::new());
        let missing = PeerId::random();

        let policy = RetryPolicy {
            interval: Duration::from_secs(1),
            max_attempts: Some(3),
        };
        let mut connector = PeerConnector::new(Arc::new(local), policy);

        let result = connector.run(&[addr_for(missing)], &CancellationToken::new()).await;

        assert!(matches!(result, Err(NodeError::PeersUnreachable { attempts: 3 })));
        assert_eq!(connector.state(), ConnectState::GaveUp { passes: 3 });
        assert_eq!(network.dial_attempts(&missing), 3);
    }
}
