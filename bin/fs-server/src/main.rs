//! FlowScope Statistics Server
//!
//! Hosts the mediation statistics engine for an embedding mediation
//! runtime: the flow registry receiving lifecycle events, the aggregate
//! store, the periodic cleaner, and the HTTP introspection API.
//!
//! Configuration comes from an optional TOML file (`FLOWSCOPE_CONFIG`)
//! with environment overrides; see the fs-config crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use fs_api::create_router;
use fs_config::FlowScopeConfig;
use fs_stats::{AggregateStore, FlowRegistry, StatisticsReader, StoreCleaner};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let instance_id = uuid::Uuid::new_v4();
    info!(instance_id = %instance_id, "Starting FlowScope Statistics Server");

    let config_path = std::env::var("FLOWSCOPE_CONFIG").ok().map(PathBuf::from);
    let config = FlowScopeConfig::load(config_path.as_deref())?;

    let store = Arc::new(AggregateStore::new());
    let registry = Arc::new(FlowRegistry::with_config(
        store.clone(),
        &config.collection,
        config.node.clone(),
    ));
    let reader = StatisticsReader::new(store.clone());
    let cleaner = StoreCleaner::start(store.clone(), config.cleaner.clone());

    let app = create_router(reader)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.api.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = config.api.port, "Introspection API listening");

    log_startup_summary(&config, &registry);

    info!("FlowScope started. Press Ctrl+C to shutdown.");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutdown signal received, HTTP server drained");

    cleaner.shutdown();

    info!(
        active_flows = registry.active_flows(),
        trees = store.tree_count(),
        "FlowScope shutdown complete"
    );
    Ok(())
}

fn log_startup_summary(config: &FlowScopeConfig, registry: &FlowRegistry) {
    info!("=== FlowScope Startup Summary ===");
    if config.collection.enabled {
        info!("  Collection: ENABLED");
    } else {
        info!("  Collection: DISABLED (all lifecycle events ignored)");
    }
    if config.cleaner.enabled {
        info!(interval_secs = config.cleaner.interval_secs, "  Cleaner: ENABLED");
    } else {
        info!("  Cleaner: DISABLED (aggregate store grows unbounded)");
    }
    if let Some(host) = &registry.node().host {
        info!(host = %host, port = ?registry.node().port, "  Node identity");
    }
    info!("=================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
