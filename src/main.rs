use anyhow::{Context, Result};
use chunk_store::{
    config::AppConfig,
    db,
    services::{UploadService, UploadSettings, blob::FilesystemBlobStore},
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting chunk-store with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url, cfg.max_connections).await?;

    // --- Handle migration mode ---
    if migrate {
        db::migrate(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::ensure_migrated(&pool).await?;

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize core service ---
    let blobs = Arc::new(FilesystemBlobStore::new(&cfg.storage_dir));
    let settings = UploadSettings {
        bucket: cfg.bucket.clone(),
        public_url_prefix: cfg.public_url_prefix.clone(),
        max_chunk_bytes: i64::try_from(cfg.max_chunk_bytes)
            .context("max_chunk_bytes does not fit in a signed 64-bit integer")?,
        ..UploadSettings::default()
    };
    let service = UploadService::new(Arc::new(pool), blobs, settings);

    // --- Build router ---
    let app = chunk_store::app(service, cfg.max_chunk_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
