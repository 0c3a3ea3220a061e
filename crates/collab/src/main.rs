//! Collaboration server binary.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use collab::server::{CollaborationServer, ServerConfig};
use collab::storage::SqliteStore;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("starting collaboration server");
    tracing::info!("snapshot database: {:?}", config.db_path);

    let store = match SqliteStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("failed to open snapshot database: {}", e);
            std::process::exit(1);
        }
    };

    let server = CollaborationServer::new(config, store);
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}
