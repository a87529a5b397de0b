use anyhow::Result;
use client_portal::{
    config::AppConfig,
    db,
    state::AppState,
    storage::{ObjectStorage, s3::S3Storage},
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting client-portal with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Object store ---
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::connect(&cfg.s3).await);
    if let Err(err) = storage.probe().await {
        // Not fatal: /readyz keeps reporting it until the bucket is reachable.
        tracing::warn!(error = %err, bucket = %cfg.s3.bucket, "object store not reachable yet");
    }

    // --- Build router ---
    let state = AppState::new(db, storage, cfg.download_url_ttl, cfg.upload_url_ttl);
    let app = client_portal::app(state);

    // --- Start server ---
    let listener = bind(&cfg).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bind the configured address. A wildcard host that is refused falls back
/// to loopback on the same port.
async fn bind(cfg: &AppConfig) -> Result<TcpListener> {
    let addr = cfg.addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let loopback = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(%addr, error = %err, fallback = %loopback, "bind refused, using loopback");
            Ok(TcpListener::bind(&loopback).await?)
        }
        Err(err) => Err(err.into()),
    }
}
