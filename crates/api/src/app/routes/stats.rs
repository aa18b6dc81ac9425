use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::dto::StatsResponse;
use crate::app::errors;
use crate::app::services::AppServices;

/// `GET /stats`: current class mix against the target.
pub async fn get_stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let orchestrator = services.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || orchestrator.tracker().counts()).await;

    match result {
        Ok(Ok(counts)) => (
            StatusCode::OK,
            Json(StatsResponse {
                counts,
                fractions: counts.fractions(),
                target: services.target(),
            }),
        )
            .into_response(),
        Ok(Err(e)) => errors::repository_error_to_response(e),
        Err(e) => errors::join_error_to_response(e),
    }
}
