//! Defines routes for the simple package index.
//!
//! ## Structure
//! - **Index endpoints** (mounted at `/` and again at `/simple/`)
//!   - `GET  /`                      : list packages
//!   - `GET  /{package}`             : redirect to `/{package}/`
//!   - `GET  /{package}/`            : list distribution files of a package
//!   - `GET  /{package}/{filename}`  : download a distribution
//!   - `HEAD /{package}/{filename}`  : distribution headers only
//!
//! - **Health checks**
//!   - `GET /healthz`, `GET /readyz`
//!
//! Links in listings are relative, so both mounts serve working pages.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        index_handlers::{
            get_distribution, head_distribution, list_distributions, list_packages,
            redirect_to_slash,
        },
    },
    services::storage_service::StorageService,
};
use axum::{Router, routing::get};

/// Build and return the router for the index and health routes.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(index_routes("/"))
        .merge(index_routes("/simple/"))
}

/// Index routes under `prefix`, which must end with `/`.
fn index_routes(prefix: &str) -> Router<StorageService> {
    Router::new()
        .route(prefix, get(list_packages))
        .route(&format!("{prefix}{{package}}"), get(redirect_to_slash))
        .route(&format!("{prefix}{{package}}/"), get(list_distributions))
        .route(
            &format!("{prefix}{{package}}/{{filename}}"),
            get(get_distribution).head(head_distribution),
        )
}
