//! Error types for the party node.
//!
//! Component operations return [`NodeResult`]; only the top-level sequencing in
//! [`crate::node`] decides whether a given failure is fatal. All errors implement
//! `ResponseError` so the local HTTP endpoint can hand them back directly.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::overlay::OverlayError;

/// Node error type with structured error responses.
#[derive(Error, Debug)]
pub enum NodeError {
    // Startup errors
    #[error("Repo error: {0}")]
    Repo(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Peer list errors
    #[error("Invalid peer address '{address}': {reason}")]
    InvalidPeerAddress { address: String, reason: String },

    #[error("Gave up connecting to peers after {attempts} attempts")]
    PeersUnreachable { attempts: u32 },

    // Overlay errors
    #[error("Overlay error: {0}")]
    Overlay(#[from] OverlayError),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Request endpoint errors
    #[error("RPC server error: {0}")]
    RpcServer(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl NodeError {
    /// Get the error code for structured error responses.
    fn error_code(&self) -> &'static str {
        match self {
            Self::Repo(_) => "REPO_ERROR",
            Self::Identity(_) => "IDENTITY_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidPeerAddress { .. } => "INVALID_PEER_ADDRESS",
            Self::PeersUnreachable { .. } => "PEERS_UNREACHABLE",
            Self::Overlay(_) => "OVERLAY_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::RpcServer(_) => "RPC_SERVER_ERROR",
        }
    }
}

impl ResponseError for NodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request - Client errors
            Self::Deserialization(_) | Self::InvalidPeerAddress { .. } => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway - Overlay errors
            Self::Overlay(_) | Self::PeersUnreachable { .. } => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error - Everything else
            Self::Repo(_)
            | Self::Identity(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::RpcServer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code(),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

// Conversion from common error types

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

/// Result type alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
