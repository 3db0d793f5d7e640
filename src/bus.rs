//! Party bus: a namespaced pub/sub topic carrying party messages.
//!
//! Joining subscribes to `tss-party:<name>` and spawns a read loop that decodes
//! inbound messages into a bounded channel. Messages originated by this node
//! are dropped, both by overlay source and by declared sender, so the consumer
//! only ever sees other members' traffic. When the channel is full the read
//! loop waits; nothing is dropped for lack of space.

use std::sync::Arc;

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::NodeResult;
use crate::overlay::{Overlay, TopicSubscription};

/// Prefix applied to every party topic name on the wire.
pub const TOPIC_PREFIX: &str = "tss-party:";

/// Capacity of the inbound message channel.
pub const BUF_SIZE: usize = 128;

/// Message exchanged between party members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMessage {
    #[serde(rename = "Message")]
    pub message: String,
    /// Base58 peer id of the sending node.
    #[serde(rename = "SenderID")]
    pub sender_id: String,
}

/// Wire topic for a party name.
pub fn topic_name(name: &str) -> String {
    format!("{TOPIC_PREFIX}{name}")
}

/// Membership in one party topic.
pub struct PartyBus {
    overlay: Arc<dyn Overlay>,
    topic: String,
    self_id: PeerId,
    messages: mpsc::Receiver<PartyMessage>,
}

impl PartyBus {
    /// Subscribe to the party topic and start the read loop.
    ///
    /// The loop stops when `cancel` fires or the subscription fails; the
    /// message stream then ends. There is no separate unsubscribe.
    pub async fn join(
        overlay: Arc<dyn Overlay>,
        self_id: PeerId,
        name: &str,
        cancel: CancellationToken,
    ) -> NodeResult<Self> {
        let topic = topic_name(name);
        let subscription = overlay.subscribe(&topic).await?;

        let (tx, rx) = mpsc::channel(BUF_SIZE);
        tokio::spawn(
            read_loop(subscription, self_id, tx, cancel)
                .instrument(tracing::info_span!("party_read_loop", topic = %topic)),
        );

        tracing::info!(topic = %topic, "Joined party");

        Ok(Self {
            overlay,
            topic,
            self_id,
            messages: rx,
        })
    }

    /// Wire name of the joined topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a message to the party, attributed to this node.
    pub async fn publish(&self, message: &str) -> NodeResult<()> {
        let party_message = PartyMessage {
            message: message.to_string(),
            sender_id: self.self_id.to_base58(),
        };
        let data = serde_json::to_vec(&party_message)?;

        self.overlay.publish(&self.topic, data).await?;
        Ok(())
    }

    /// Peers currently seen on the party topic.
    pub async fn list_members(&self) -> Vec<PeerId> {
        self.overlay.list_peers(&self.topic).await
    }

    /// Next message from another member, or `None` once the bus has stopped.
    pub async fn next_message(&mut self) -> Option<PartyMessage> {
        self.messages.recv().await
    }

    /// The inbound message stream.
    pub fn messages(&mut self) -> &mut mpsc::Receiver<PartyMessage> {
        &mut self.messages
    }
}

async fn read_loop(
    mut subscription: Box<dyn TopicSubscription>,
    self_id: PeerId,
    tx: mpsc::Sender<PartyMessage>,
    cancel: CancellationToken,
) {
    let self_text = self_id.to_base58();

    loop {
        let inbound = tokio::select! {
            () = cancel.cancelled() => break,
            inbound = subscription.next() => match inbound {
                Ok(inbound) => inbound,
                Err(e) => {
                    tracing::debug!(error = %e, "Party subscription ended");
                    break;
                }
            },
        };

        if inbound.source == Some(self_id) {
            continue;
        }

        let message: PartyMessage = match serde_json::from_slice(&inbound.data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Discarding undecodable party message");
                continue;
            }
        };

        if message.sender_id == self_text {
            continue;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            sent = tx.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Party read loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{InboundMessage, MemoryNetwork};
    use std::time::Duration;

    async fn join(network: &MemoryNetwork, cancel: &CancellationToken) -> PartyBus {
        let peer_id = PeerId::random();
        let overlay = Arc::new(network.join(peer_id, cancel.clone()));
        PartyBus::join(overlay, peer_id, "fete", cancel.clone())
            .await
            .unwrap()
    }

    #[test]
    fn test_wire_format() {
        let message = PartyMessage {
            message: "hello".to_string(),
            sender_id: "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["Message"], "hello");
        assert_eq!(json["SenderID"], "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN");
        assert_eq!(topic_name("fete"), "tss-party:fete");
    }

    #[tokio::test]
    async fn test_round_trip_between_members() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let a = join(&network, &cancel).await;
        let mut b = join(&network, &cancel).await;

        a.publish("hello").await.unwrap();

        let received = b.next_message().await.unwrap();
        assert_eq!(received.message, "hello");
        assert_eq!(received.sender_id, a.self_id.to_base58());
    }

    #[tokio::test]
    async fn test_own_messages_are_not_delivered() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let mut a = join(&network, &cancel).await;
        let b = join(&network, &cancel).await;

        a.publish("mine").await.unwrap();
        b.publish("theirs").await.unwrap();

        assert_eq!(a.next_message().await.unwrap().message, "theirs");
        assert!(a.messages().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forged_self_sender_is_dropped() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let mut a = join(&network, &cancel).await;

        let forged = PartyMessage {
            message: "spoof".to_string(),
            sender_id: a.self_id.to_base58(),
        };
        network.inject(
            a.topic(),
            InboundMessage {
                data: serde_json::to_vec(&forged).unwrap(),
                source: Some(PeerId::random()),
            },
        );
        network.inject(
            a.topic(),
            InboundMessage {
                data: serde_json::to_vec(&PartyMessage {
                    message: "real".to_string(),
                    sender_id: PeerId::random().to_base58(),
                })
                .unwrap(),
                source: None,
            },
        );

        assert_eq!(a.next_message().await.unwrap().message, "real");
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_close_stream() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let a = join(&network, &cancel).await;
        let mut b = join(&network, &cancel).await;

        network.inject(
            b.topic(),
            InboundMessage {
                data: b"{not json".to_vec(),
                source: Some(a.self_id),
            },
        );
        a.publish("after").await.unwrap();

        assert_eq!(b.next_message().await.unwrap().message, "after");
    }

    #[tokio::test]
    async fn test_full_channel_applies_backpressure() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let a = join(&network, &cancel).await;
        let mut b = join(&network, &cancel).await;

        let total = BUF_SIZE + 2;
        for i in 0..total {
            a.publish(&format!("msg-{i}")).await.unwrap();
        }

        // The read loop fills the channel, then waits on the consumer.
        tokio::time::timeout(Duration::from_secs(5), async {
            while b.messages().len() < BUF_SIZE {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(b.messages().len(), BUF_SIZE);

        for i in 0..total {
            let received = tokio::time::timeout(Duration::from_secs(5), b.next_message())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.message, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn test_cancel_ends_stream_and_is_idempotent() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let mut a = join(&network, &cancel).await;

        cancel.cancel();
        cancel.cancel();

        assert!(a.next_message().await.is_none());
        assert!(a.publish("late").await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_bus_leaves_overlay_running() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let peer_id = PeerId::random();
        let overlay = Arc::new(network.join(peer_id, cancel.clone()));
        let other = network.join(PeerId::random(), cancel.clone());

        let bus = PartyBus::join(overlay.clone(), peer_id, "fete", cancel.clone())
            .await
            .unwrap();
        drop(bus);

        assert!(!cancel.is_cancelled());
        let target: crate::overlay::PeerAddr =
            format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", other.local_peer_id())
                .parse()
                .unwrap();
        assert!(overlay.connect(&target).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_members() {
        let network = MemoryNetwork::new();
        let cancel = CancellationToken::new();
        let a = join(&network, &cancel).await;
        let b = join(&network, &cancel).await;

        assert_eq!(a.list_members().await, vec![b.self_id]);
    }
}
