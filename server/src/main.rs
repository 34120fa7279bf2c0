//! Inventory API server: tenant-scoped entity routes over the tenant connection router.
//!
//! Run from repo root: `cargo run -p inventory-server`
//! Set `TENANT_BACKEND=memory` to run without PostgreSQL.

use inventory_tenancy::{
    build_router,
    inventory_schemas,
    AppState,
    Backend,
    MemoryDriver,
    PgDriver,
    SchemaRegistry,
    ServerConfig,
    TenantDriver,
    TenantRouter,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("inventory_tenancy=info,inventory_server=info")
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let schemas = Arc::new(inventory_schemas());
    match config.backend {
        Backend::Postgres => {
            let driver = PgDriver::new(&config.database_url)?;
            serve(config, driver, schemas).await
        }
        Backend::Memory => serve(config, MemoryDriver::new(), schemas).await,
    }
}

async fn serve<D: TenantDriver>(
    config: ServerConfig,
    driver: D,
    schemas: Arc<SchemaRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let router = TenantRouter::new(driver, config.router.clone());
    let reaper = router.spawn_idle_reaper();
    let app = build_router(AppState::new(router.clone(), schemas));

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(backend = ?config.backend, "listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    router.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
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
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, closing tenant connections");
}
