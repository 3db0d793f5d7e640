//! HTTP routes for the local request endpoint.
//!
//! Routes are organized by functionality:
//! - `health`: Health check and build info
//! - `rpc`: JSON-RPC `message_ping` / `message_sign`

pub mod health;
pub mod rpc;

use std::net::SocketAddr;

use actix_web::dev::Server;
use actix_web::{App, HttpServer, middleware, web};
use tracing_actix_web::TracingLogger;

pub use health::{NodeInfo, build_info, health};
pub use rpc::RpcState;

/// Bind the endpoint and return the server future.
///
/// The caller decides where to drive it; the future completes when the server
/// stops.
pub fn serve(addr: SocketAddr, rpc: RpcState, node: NodeInfo) -> std::io::Result<Server> {
    let rpc_data = web::Data::new(rpc);
    let node_data = web::Data::new(node);

    let server = HttpServer::new(move || {
        App::new()
            // Request tracing
            .wrap(TracingLogger::default())
            // Default headers
            .wrap(middleware::DefaultHeaders::new().add(("X-Service", "party-node")))
            // Shared state
            .app_data(rpc_data.clone())
            .app_data(node_data.clone())
            // Routes
            .configure(health::configure)
            .configure(rpc::configure)
    })
    .workers(1)
    .disable_signals()
    .bind(addr)?
    .run();

    tracing::info!(addr = %addr, "JSON-RPC endpoint listening");

    Ok(server)
}
