//! mh-server: HTTP API over the aggregation engine.
//!
//! This crate ties the other mh-* crates into a running server:
//!
//! - Axum-based HTTP API with a request gate and request ids
//! - Store provisioning and readiness checks before binding
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::sync::Arc;

use mh_core::config::Config;
use mh_core::Error;
use mh_db::SqliteStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the metahub server.
///
/// Opens the store, provisions the schema when configured to, refuses to
/// continue if the store is not ready, then serves until a shutdown signal
/// arrives.
pub async fn start(config: Config) -> mh_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let store = SqliteStore::open(&config.database)?;
    if config.database.is_memory() {
        tracing::info!("Store opened (in-memory)");
    } else {
        tracing::info!("Store opened at {}", config.database.dsn);
    }

    let auto_migrate = config.database.auto_migrate;
    let bind_addr = config.server.bind_addr();
    let ctx = AppContext::from_config(Arc::new(store), config)?;

    ctx.engine.auto_migrate(auto_migrate).await?;
    if !ctx.engine.ready().await {
        return Err(Error::store_unavailable(
            "store schema is not current; run `metahub migrate` or enable auto-migrate",
        ));
    }

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {bind_addr}: {e}")))?;

    serve(listener, ctx, CancellationToken::new()).await
}

/// Serve the API on `listener` until a signal arrives or `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    ctx: AppContext,
    cancel: CancellationToken,
) -> mh_core::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(
            providers = ctx.engine.providers().len(),
            "Starting server on {addr}"
        );
    }

    let app = router::build_router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .map_err(|e| Error::Io { source: e })?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_refuses_unmigrated_store() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.database.auto_migrate = false;

        let err = start(config).await.unwrap_err();
        assert!(matches!(err, Error::Store { retryable: true, .. }));
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let store = Arc::new(SqliteStore::from_pool(mh_db::pool::init_memory_pool().unwrap()));
        let ctx = AppContext::from_config(store, Config::default()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(serve(listener, ctx, cancel.clone()));
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
