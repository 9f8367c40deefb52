//! GraphQL Edge Cache Server
//!
//! Loads configuration, sets up logging and serves the gateway.

use graphql_edge_cache::{EdgeGateway, GatewayConfig, GatewayServer, MetricsEndpoint};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Main entry point
///
/// # Usage
/// ```bash
/// # Configure from the environment only
/// EDGE_CACHE_STORE_TOKEN=... graphql-edge-cache
///
/// # Configure from a file, environment overrides still apply
/// graphql-edge-cache /path/to/edge_cache.yaml
/// ```
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting GraphQL edge cache gateway");

    if let Err(e) = run().await {
        error!("Gateway stopped: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            GatewayConfig::from_file(&path)?
        }
        None => {
            info!("No config file given, using defaults and environment");
            GatewayConfig::from_env()?
        }
    };

    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Origin: {}", config.origin_url);
    info!("  - Store: {}", config.store.base_url);
    info!(
        "  - Routing: {}: {}",
        config.routing.header_name, config.routing.tier_name
    );
    info!("  - Max body bytes: {}", config.max_body_bytes);

    let config = Arc::new(config);
    let gateway = Arc::new(EdgeGateway::from_config(Arc::clone(&config))?);

    if let Some(endpoint) = config.metrics_endpoint.as_ref().filter(|e| e.enabled) {
        let addr: SocketAddr = endpoint.address.parse()?;
        let metrics_endpoint = MetricsEndpoint::new(gateway.metrics_arc(), addr);
        tokio::spawn(async move {
            if let Err(e) = metrics_endpoint.start().await {
                error!("Metrics endpoint failed: {}", e);
            }
        });
    }

    let server = GatewayServer::bind(config.listen_addr()?, gateway).await?;
    server.serve().await?;
    Ok(())
}
