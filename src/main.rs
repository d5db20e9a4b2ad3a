//! Sheets Sync Server
//!
//! Polls every configured replica on a fixed interval and broadcasts the
//! most recently changed content back to all of them.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheets_sync_server::config::{Config, GatewayConfig};
use sheets_sync_server::db;
use sheets_sync_server::error::FatalError;
use sheets_sync_server::gateway::{MemoryGateway, SheetsGateway, SourceGateway};
use sheets_sync_server::routes;
use sheets_sync_server::state::AppState;
use sheets_sync_server::sync::{CheckpointStore, Scheduler, Snapshot, SqliteCheckpointStore, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sheets_sync_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(FatalError::from)?;

    tracing::info!("Starting Sheets Sync Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Syncing {} sources every {:?}",
        config.sync.sources.len(),
        config.sync.interval
    );

    let gateway = build_gateway(&config)?;

    // Initialize database
    let pool = db::create_pool(&config.database.url)
        .await
        .map_err(FatalError::from)?;
    tracing::info!("Database initialized at {}", config.database.url);

    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(pool));

    let engine = Arc::new(SyncEngine::new(
        gateway,
        Arc::clone(&store),
        config.sync.sources.clone(),
        config.sync.call_timeout,
    ));
    engine.initialize(config.sync.reset_on_start).await?;

    // Start scheduling
    let scheduler = Scheduler::new(
        Arc::clone(&engine),
        config.sync.interval,
        config.sync.cycle_timeout,
    );
    let app_state = AppState::new(config.clone(), store, scheduler.status());

    let cancel = CancellationToken::new();
    let scheduler_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run_forever(cancel).await })
    };

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Sheets Sync Server listening on {}", addr);

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    };

    let served = axum::serve(listener, routes::app(app_state))
        .with_graceful_shutdown(shutdown)
        .await;

    // Stop scheduling even if the server failed on its own
    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task panicked: {}", e);
    }

    served.context("HTTP server failed")?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn build_gateway(config: &Config) -> Result<Arc<dyn SourceGateway>, FatalError> {
    match &config.gateway {
        GatewayConfig::Sheets(sheets) => {
            tracing::info!("Sheets API: {}", sheets.api_base);
            let gateway =
                SheetsGateway::new(sheets).map_err(|e| FatalError::GatewayInit(e.to_string()))?;
            Ok(Arc::new(gateway))
        }
        GatewayConfig::Memory => {
            tracing::warn!("Using in-memory gateway, replica contents are not persisted");
            let ids = config.sync.sources.iter().map(|s| s.id.as_str());
            Ok(Arc::new(MemoryGateway::with_sources(ids, &Snapshot::empty())))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
