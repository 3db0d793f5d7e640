//! Startup sequencing and the steady-state loop.
//!
//! Order: repo → identity → overlay host → party bus → request endpoint →
//! peer connection → signer profile → steady state. Any error returned from
//! here is fatal for the process.
//!
//! The endpoint runs in its own task and reports its termination on an error
//! channel. The steady state waits on that channel, the shutdown signal, and
//! the party bus; inbound party messages are logged and the loop continues.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::PartyBus;
use crate::config::Settings;
use crate::error::{NodeError, NodeResult};
use crate::identity::{Identity, IdentityStore};
use crate::overlay::{Libp2pOverlay, Overlay};
use crate::peers::{ConnectState, PeerConnector, load_peer_list};
use crate::repo;
use crate::routes::{self, NodeInfo, RpcState};
use crate::signer::{SignerProfile, StubSigner};

/// What the node observed before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Party messages delivered by the bus in the steady state.
    pub messages_received: u64,
}

/// Run the node until Ctrl-C.
///
/// Must be driven from an actix system (`#[actix_web::main]`).
pub async fn run(settings: Settings) -> NodeResult<()> {
    let repo_dir = repo::ensure(settings.repo())?;
    let identity = IdentityStore::obtain(settings.key_path(), &repo_dir)?;

    let cancel = CancellationToken::new();
    let overlay = Libp2pOverlay::spawn(
        identity.keypair(),
        settings.listen_multiaddr(),
        cancel.clone(),
    )?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
        }
    };

    let stats = run_until(&settings, &identity, Arc::new(overlay), cancel, shutdown).await?;
    tracing::info!(messages_received = stats.messages_received, "Node stopped");
    Ok(())
}

/// Run the node on an existing overlay until `shutdown` completes, a fatal
/// error occurs, or the party bus closes.
///
/// `cancel` is cancelled on return.
pub async fn run_until<F>(
    settings: &Settings,
    identity: &Identity,
    overlay: Arc<dyn Overlay>,
    cancel: CancellationToken,
    shutdown: F,
) -> NodeResult<RunStats>
where
    F: Future<Output = ()>,
{
    let result = start(settings, identity, overlay, &cancel, shutdown).await;
    cancel.cancel();
    result
}

async fn start<F>(
    settings: &Settings,
    identity: &Identity,
    overlay: Arc<dyn Overlay>,
    cancel: &CancellationToken,
    shutdown: F,
) -> NodeResult<RunStats>
where
    F: Future<Output = ()>,
{
    let mut bus = PartyBus::join(
        Arc::clone(&overlay),
        identity.peer_id(),
        settings.topic(),
        cancel.clone(),
    )
    .await?;

    let node_info = NodeInfo {
        peer_id: identity.peer_id_string(),
        public_key: identity.public_key_hex().to_string(),
        nickname: identity.nickname().to_string(),
        topic: bus.topic().to_string(),
    };
    let http_addr = settings.http_addr();
    let server = routes::serve(http_addr, RpcState::new(Arc::new(StubSigner)), node_info)
        .map_err(|e| NodeError::RpcServer(format!("cannot bind {http_addr}: {e}")))?;
    let server_handle = server.handle();

    let (error_tx, mut error_rx) = mpsc::channel::<NodeError>(1);
    actix_web::rt::spawn(async move {
        let error = match server.await {
            Ok(()) => NodeError::RpcServer("server stopped".to_string()),
            Err(e) => NodeError::RpcServer(e.to_string()),
        };
        let _ = error_tx.send(error).await;
    });

    let result = steady_state(
        settings,
        identity,
        overlay,
        &mut bus,
        cancel,
        &mut error_rx,
        shutdown,
    )
    .await;

    server_handle.stop(true).await;
    result
}

async fn steady_state<F>(
    settings: &Settings,
    identity: &Identity,
    overlay: Arc<dyn Overlay>,
    bus: &mut PartyBus,
    cancel: &CancellationToken,
    errors: &mut mpsc::Receiver<NodeError>,
    shutdown: F,
) -> NodeResult<RunStats>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let peers = load_peer_list(settings.peer_list());
    let mut connector = PeerConnector::new(overlay, settings.retry_policy());

    let state = tokio::select! {
        state = connector.run(&peers, cancel) => state?,
        () = &mut shutdown => {
            tracing::info!("Shutdown requested while connecting to peers");
            return Ok(RunStats::default());
        }
        Some(error) = errors.recv() => return Err(error),
    };

    if state != ConnectState::FullyConnected {
        tracing::info!(state = ?state, "Peer connection interrupted");
        return Ok(RunStats::default());
    }

    let profile = SignerProfile::new(identity);
    tracing::info!(
        nickname = %profile.nickname,
        peer_id = %profile.peer_id,
        party_key = profile.party_key,
        members = bus.list_members().await.len(),
        "Signer ready"
    );

    let mut stats = RunStats::default();
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("Shutting down");
                return Ok(stats);
            }
            Some(error) = errors.recv() => return Err(error),
            message = bus.next_message() => match message {
                Some(message) => {
                    stats.messages_received += 1;
                    tracing::info!(
                        sender = %message.sender_id,
                        message = %message.message,
                        "Received party message"
                    );
                }
                None => {
                    tracing::info!("Party bus closed");
                    return Ok(stats);
                }
            },
        }
    }
}
