//! Signing backend seam and the node's signer profile.
//!
//! Threshold signing is not implemented. The request endpoint talks to a
//! [`SigningBackend`]; the only backend, [`StubSigner`], logs the request and
//! reports [`SigningOutcome::Unimplemented`].

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::identity::Identity;

/// Result of a signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SigningOutcome {
    Unimplemented,
    Accepted { signature: String },
    Rejected { reason: String },
}

/// Something that can answer signing requests.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    async fn sign(&self, message: &str) -> SigningOutcome;
}

/// Backend that accepts requests and signs nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubSigner;

#[async_trait]
impl SigningBackend for StubSigner {
    #[tracing::instrument(skip(self, message), fields(message_len = message.len()))]
    async fn sign(&self, message: &str) -> SigningOutcome {
        tracing::info!("Received signing request");
        SigningOutcome::Unimplemented
    }
}

/// How this node presents itself to a signing party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignerProfile {
    pub nickname: String,
    pub peer_id: String,
    /// Numeric party key derived from the peer id.
    pub party_key: u64,
}

impl SignerProfile {
    pub fn new(identity: &Identity) -> Self {
        Self {
            nickname: identity.nickname().to_string(),
            peer_id: identity.peer_id_string(),
            party_key: party_key(&identity.peer_id().to_bytes()),
        }
    }
}

/// First eight bytes of SHA-256 over the peer id, big-endian.
fn party_key(peer_id_bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(peer_id_bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
