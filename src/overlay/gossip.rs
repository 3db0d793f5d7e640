//! libp2p overlay: TCP + noise + yamux, gossipsub topics and liveness ping.
//!
//! The swarm is owned by a single event-loop task. [`Libp2pOverlay`] handles are
//! cheap clones that drive it over a command channel; each request carries a
//! oneshot for its reply. Dials resolve once the connection is established or
//! the swarm reports the outgoing connection error.
//!
//! Connected peers are registered as gossipsub explicit peers. The party is a
//! small, operator-curated set, so every member should receive every message
//! regardless of mesh size, and gossipsub keeps redialing explicit peers that
//! drop off.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, TopicHash};
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, noise, ping, tcp, yamux};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{InboundMessage, Overlay, OverlayError, PeerAddr, TopicSubscription};

const COMMAND_BUFFER: usize = 64;
/// Per-subscription buffer between the swarm task and the subscriber.
const SUBSCRIPTION_BUFFER: usize = 128;
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(NetworkBehaviour)]
struct PartyBehaviour {
    gossipsub: gossipsub::Behaviour,
    ping: ping::Behaviour,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Dial {
        peer: PeerAddr,
        reply: Reply<Result<(), OverlayError>>,
    },
    Subscribe {
        topic: String,
        reply: Reply<Result<mpsc::Receiver<InboundMessage>, OverlayError>>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: Reply<Result<(), OverlayError>>,
    },
    ListPeers {
        topic: String,
        reply: Reply<Vec<PeerId>>,
    },
    ListenAddrs {
        reply: Reply<Vec<Multiaddr>>,
    },
}

/// Handle to a running libp2p host.
#[derive(Clone)]
pub struct Libp2pOverlay {
    peer_id: PeerId,
    commands: mpsc::Sender<Command>,
}

impl Libp2pOverlay {
    /// Build the host, start listening, and spawn its event loop.
    ///
    /// Must be called from within a tokio runtime. The event loop stops when
    /// `cancel` fires; open subscriptions then end with [`OverlayError::Closed`].
    pub fn spawn(
        keypair: Keypair,
        listen_addr: Multiaddr,
        cancel: CancellationToken,
    ) -> Result<Self, OverlayError> {
        let peer_id = keypair.public().to_peer_id();
        let mut swarm = build_swarm(keypair)?;

        swarm.listen_on(listen_addr.clone()).map_err(|e| {
            OverlayError::Transport(format!("cannot listen on {listen_addr}: {e}"))
        })?;

        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let event_loop = EventLoop {
            swarm,
            commands: rx,
            cancel,
            pending_dials: HashMap::new(),
            subscribers: HashMap::new(),
        };
        tokio::spawn(event_loop.run());

        tracing::info!(peer_id = %peer_id, listen_addr = %listen_addr, "Started overlay host");

        Ok(Self { peer_id, commands })
    }

    /// Addresses the host is currently listening on.
    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.request(|reply| Command::ListenAddrs { reply })
            .await
            .unwrap_or_default()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| OverlayError::Closed)?;
        rx.await.map_err(|_| OverlayError::Closed)
    }
}

fn build_swarm(keypair: Keypair) -> Result<Swarm<PartyBehaviour>, OverlayError> {
    let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| OverlayError::Transport(e.to_string()))?
        .with_behaviour(
            |key| -> Result<PartyBehaviour, Box<dyn std::error::Error + Send + Sync>> {
                let config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(HEARTBEAT_INTERVAL)
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .build()
                    .map_err(|e| e.to_string())?;
                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    config,
                )?;

                Ok(PartyBehaviour {
                    gossipsub,
                    ping: ping::Behaviour::new(ping::Config::new()),
                })
            },
        )
        .map_err(|e| OverlayError::Transport(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    Ok(swarm)
}

struct EventLoop {
    swarm: Swarm<PartyBehaviour>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    pending_dials: HashMap<PeerId, Vec<Reply<Result<(), OverlayError>>>>,
    subscribers: HashMap<TopicHash, Vec<mpsc::Sender<InboundMessage>>>,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }

        for (_, waiters) in self.pending_dials.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(OverlayError::Closed));
            }
        }
        tracing::info!("Overlay host stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer, reply } => {
                let peer_id = peer.peer_id();
                if self.swarm.is_connected(&peer_id) {
                    let _ = reply.send(Ok(()));
                    return;
                }

                match self.swarm.dial(peer.addr().clone()) {
                    Ok(()) => self.pending_dials.entry(peer_id).or_default().push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(OverlayError::Dial {
                            peer: peer_id,
                            reason: e.to_string(),
                        }));
                    }
                }
            }
            Command::Subscribe { topic, reply } => {
                let topic = IdentTopic::new(topic);
                let result = match self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                    Ok(_) => {
                        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
                        self.subscribers.entry(topic.hash()).or_default().push(tx);
                        Ok(rx)
                    }
                    Err(e) => Err(OverlayError::Subscribe(format!("{e:?}"))),
                };
                let _ = reply.send(result);
            }
            Command::Publish { topic, data, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(IdentTopic::new(topic), data)
                    .map(|_| ())
                    .map_err(|e| OverlayError::Publish(format!("{e:?}")));
                let _ = reply.send(result);
            }
            Command::ListPeers { topic, reply } => {
                let hash = IdentTopic::new(topic).hash();
                let peers = self
                    .swarm
                    .behaviour()
                    .gossipsub
                    .all_peers()
                    .filter(|(_, topics)| topics.contains(&&hash))
                    .map(|(peer_id, _)| *peer_id)
                    .collect();
                let _ = reply.send(peers);
            }
            Command::ListenAddrs { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<PartyBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let local_peer_id = *self.swarm.local_peer_id();
                tracing::info!(
                    address = %address.with(Protocol::P2p(local_peer_id)),
                    "Listening"
                );
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                tracing::debug!(peer = %peer_id, remote = %endpoint.get_remote_address(), "Connection established");
                self.swarm
                    .behaviour_mut()
                    .gossipsub
                    .add_explicit_peer(&peer_id);
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    for waiter in waiters {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id, cause, ..
            } => {
                tracing::debug!(peer = %peer_id, cause = ?cause, "Connection closed");
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    let reason = error.to_string();
                    for waiter in waiters {
                        let _ = waiter.send(Err(OverlayError::Dial {
                            peer: peer_id,
                            reason: reason.clone(),
                        }));
                    }
                }
            }
            SwarmEvent::Behaviour(PartyBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => self.dispatch(message),
            SwarmEvent::Behaviour(PartyBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                tracing::debug!(peer = %peer_id, topic = %topic, "Peer subscribed");
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, message: gossipsub::Message) {
        let gossipsub::Message {
            source,
            data,
            topic,
            ..
        } = message;
        let Some(subscribers) = self.subscribers.get_mut(&topic) else {
            return;
        };

        let inbound = InboundMessage { data, source };
        subscribers.retain(|tx| match tx.try_send(inbound.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(topic = %topic, "Subscriber is not keeping up, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

struct Libp2pSubscription {
    rx: mpsc::Receiver<InboundMessage>,
}

#[async_trait]
impl TopicSubscription for Libp2pSubscription {
    async fn next(&mut self) -> Result<InboundMessage, OverlayError> {
        self.rx.recv().await.ok_or(OverlayError::Closed)
    }
}

#[async_trait]
impl Overlay for Libp2pOverlay {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn connect(&self, peer: &PeerAddr) -> Result<(), OverlayError> {
        let dial = self.request(|reply| Command::Dial {
            peer: peer.clone(),
            reply,
        });

        tokio::time::timeout(DIAL_TIMEOUT, dial)
            .await
            .map_err(|_| OverlayError::DialTimeout(peer.peer_id()))??
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicSubscription>, OverlayError> {
        let rx = self
            .request(|reply| Command::Subscribe {
                topic: topic.to_string(),
                reply,
            })
            .await??;

        Ok(Box::new(Libp2pSubscription { rx }))
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), OverlayError> {
        self.request(|reply| Command::Publish {
            topic: topic.to_string(),
            data,
            reply,
        })
        .await?
    }

    async fn list_peers(&self, topic: &str) -> Vec<PeerId> {
        self.request(|reply| Command::ListPeers {
            topic: topic.to_string(),
            reply,
        })
        .await
        .unwrap_or_default()
    }
}
