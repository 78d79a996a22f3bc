use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, path::PathBuf};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{ingest_service::IngestService, storage_service::StorageService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "simplepypi=info".into()),
        )
        .init();

    // --- Parse config + import list ---
    let (cfg, imports) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting simplepypi with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if fs::metadata(&cfg.storage_dir).await.is_err() {
        fs::create_dir_all(&cfg.storage_dir)
            .await
            .with_context(|| format!("creating {}", cfg.storage_dir.display()))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir.display());
    }

    // --- Handle import mode ---
    if !imports.is_empty() {
        run_imports(&IngestService::new(cfg.storage_dir.clone()), &imports).await?;
        tracing::info!("Import complete.");
        return Ok(()); // exit after import
    }

    // --- Initialize core service ---
    let storage = StorageService::new(cfg.storage_dir.clone());

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(storage);

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
        Err(err) => return Err(err).with_context(|| format!("binding {}", addr)),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Copy each file into the package tree, stopping at the first failure.
async fn run_imports(ingest: &IngestService, files: &[PathBuf]) -> Result<()> {
    tracing::info!("Importing {} distribution file(s)...", files.len());

    for path in files {
        let stored = ingest
            .ingest_file(path)
            .await
            .with_context(|| format!("importing {}", path.display()))?;
        tracing::debug!(
            "{} -> {}/{} (md5 {})",
            path.display(),
            stored.distribution.package,
            stored.distribution.filename,
            stored.md5
        );
    }

    Ok(())
}
