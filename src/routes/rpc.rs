//! JSON-RPC 2.0 endpoint.
//!
//! Methods live in the `message` namespace:
//! - `message_ping` → `"pong"`
//! - `message_sign` with params `[message]` → a signing outcome object
//!
//! Protocol errors are reported in the JSON-RPC envelope with HTTP 200.
//! Requests without an `id` are notifications and get an empty 204.

use std::sync::Arc;

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::NodeResult;
use crate::signer::SigningBackend;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

const JSONRPC_VERSION: &str = "2.0";

/// Shared state for the RPC handler.
#[derive(Clone)]
pub struct RpcState {
    backend: Arc<dyn SigningBackend>,
}

impl RpcState {
    pub fn new(backend: Arc<dyn SigningBackend>) -> Self {
        Self { backend }
    }
}

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Distinguish `"id": null` from a missing id.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

type CallResult = Result<Value, RpcError>;

fn reply(id: Value, result: CallResult) -> HttpResponse {
    let (result, error) = match result {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };

    HttpResponse::Ok().json(RpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result,
        error,
    })
}

/// POST /rpc
#[tracing::instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn rpc(state: web::Data<RpcState>, body: web::Bytes) -> NodeResult<HttpResponse> {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable RPC body");
            return Ok(reply(
                Value::Null,
                Err(RpcError::new(PARSE_ERROR, "Parse error")),
            ));
        }
    };

    if value.is_array() {
        return Ok(reply(
            Value::Null,
            Err(RpcError::new(INVALID_REQUEST, "Batch requests are not supported")),
        ));
    }

    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Ok(reply(
                Value::Null,
                Err(RpcError::new(INVALID_REQUEST, format!("Invalid request: {e}"))),
            ));
        }
    };

    let id = request.id.clone().unwrap_or(Value::Null);
    if request.jsonrpc != JSONRPC_VERSION {
        return Ok(reply(
            id,
            Err(RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\"")),
        ));
    }

    let result = call(&state, &request.method, request.params).await?;

    match request.id {
        Some(_) => Ok(reply(id, result)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

async fn call(state: &RpcState, method: &str, params: Value) -> NodeResult<CallResult> {
    tracing::debug!(method, "RPC call");

    match method {
        "message_ping" => Ok(Ok(Value::String("pong".to_string()))),
        "message_sign" => {
            let Some(message) = sign_message(params) else {
                return Ok(Err(RpcError::new(
                    INVALID_PARAMS,
                    "Invalid params: expected [message]",
                )));
            };
            let outcome = state.backend.sign(&message).await;
            Ok(Ok(serde_json::to_value(outcome)?))
        }
        other => Ok(Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ))),
    }
}

fn sign_message(params: Value) -> Option<String> {
    match params {
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::String(message)) => Some(message),
            _ => None,
        },
        _ => None,
    }
}

/// Configure RPC routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/rpc", web::post().to(rpc));
}
