//! Party node
//!
//! Bootstraps one member of a private signing party: loads or creates the
//! node key, joins the party topic, connects to every listed peer, and serves
//! a loopback JSON-RPC endpoint for `ping` and `sign`.

use party_node::{Settings, node, telemetry};

#[actix_web::main]
async fn main() {
    // Initialize tracing first
    telemetry::init_tracing();

    let settings = Settings::from_args();

    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    tracing::info!(
        listen = %settings.listen_multiaddr(),
        http = %settings.http_addr(),
        topic = %settings.topic(),
        "Starting party node"
    );

    let result = node::run(settings).await;

    telemetry::shutdown_tracing();

    if let Err(e) = result {
        tracing::error!(error = %e, "Party node failed");
        std::process::exit(1);
    }
}
