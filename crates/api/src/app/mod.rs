//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store and orchestrator wiring
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use meterlab_infra::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router from process configuration.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<(Router, Arc<services::AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((build_app_with(services.clone()), services))
}

/// Build the router over already wired services (used by tests).
pub fn build_app_with(services: Arc<services::AppServices>) -> Router {
    // Session routes: require x-session-id.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::session_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
