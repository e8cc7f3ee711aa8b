mod codec;
mod config;
mod errors;
mod metrics;
mod model;
mod rest;
mod store;
mod validate;

use axum::{routing::get, Router};
use config::Config;
use rest::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting telemetry ingestor");
    info!("HTTP server: {}", config.http_addr);
    info!("Store backend: {}", config.backend);
    if let Some(cosmos) = &config.cosmos {
        info!("Cosmos DB endpoint: {}", cosmos.account_endpoint);
    }
    info!(
        "Database: {}, container: {}, partition key: {}",
        config.database_name, config.container_name, config.partition_key_path
    );

    // Initialize metrics
    metrics::init_metrics();

    let store = match store::build_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create document store client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = store::bootstrap(store.as_ref(), &config).await {
        error!("Failed to prepare database and container: {}", e);
        std::process::exit(1);
    }

    let state = AppState::new(store, &config.database_name, &config.container_name);

    // Build HTTP app with ingestion route and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
