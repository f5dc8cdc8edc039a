mod api;
mod config;
mod dut;
mod error;
mod flow;
mod hardware;
mod interpreter;
mod models;
mod paths;
mod plugins;
mod repository;
mod services;

use crate::config::Config;
use crate::flow::FlowRegistry;
use crate::plugins::{PluginEngine, ResultObserver};
use crate::repository::StatusStore;
use crate::services::{ExecutorService, UartService};
use api::create_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bench_node=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting bench_node with config: {:?}", config);

    std::fs::create_dir_all(&config.logs_root)?;

    // Open the status store
    let store = Arc::new(StatusStore::open(&config.status_db_path)?);
    tracing::info!("Status store opened: {}", config.status_db_path.display());

    // Resolve the flow registry and observer set once at startup
    let registry = Arc::new(FlowRegistry::with_defaults());
    let mut hooks = PluginEngine::new();
    hooks.register(Box::new(ResultObserver));
    let hooks = Arc::new(hooks);

    // Initialize services
    let executor_service = ExecutorService::new(
        store,
        registry,
        hooks,
        config.logs_root.clone(),
        config.devices_dir.clone(),
    );
    let uart_service = UartService::new();

    // Create router
    let app = create_router(executor_service, uart_service);
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
