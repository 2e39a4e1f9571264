use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roombook::config::{Config, StoreKind};
use roombook::engine::Scheduler;
use roombook::store::{BookingStore, MemoryStore, WalStore};
use roombook::{compactor, http};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    let store: Arc<dyn BookingStore> = match config.store {
        StoreKind::Wal => {
            std::fs::create_dir_all(&config.data_dir)?;
            let store = Arc::new(WalStore::open(&config.wal_path())?);
            tokio::spawn(compactor::run_compactor(
                store.clone(),
                config.compact_threshold,
                compactor::COMPACT_INTERVAL,
            ));
            store as Arc<dyn BookingStore>
        }
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    let scheduler = Arc::new(Scheduler::new(store.clone(), config.store_timeout));

    let addr = config.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            store.close().await?;
            return Err(e.into());
        }
    };
    info!("roombook listening on {addr}");
    info!("  store: {:?} ({})", config.store, config.data_dir.display());
    info!("  store_timeout: {}ms", config.store_timeout.as_millis());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let served = axum::serve(listener, http::router(scheduler))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(ref e) = served {
        tracing::error!("server error: {e}");
    }

    // The store is released whether the server stopped cleanly or not.
    info!("closing store...");
    store.close().await?;
    info!("roombook stopped");
    served.map_err(Into::into)
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("shutdown signal received, draining requests");
}
