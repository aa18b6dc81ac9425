use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::dto::{AssignmentRequest, ReleaseRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::SessionContext;

/// `POST /assignments`. The body is optional.
pub async fn request_assignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    body: Bytes,
) -> axum::response::Response {
    let request: AssignmentRequest = if body.iter().all(u8::is_ascii_whitespace) {
        AssignmentRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
            }
        }
    };
    let environment = request.environment.unwrap_or(services.environment);

    let orchestrator = services.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || {
        orchestrator.request_assignment(session.session_id(), environment)
    })
    .await;

    match result {
        Ok(Ok(assignment)) => (StatusCode::OK, Json(assignment)).into_response(),
        Ok(Err(e)) => errors::assign_error_to_response(e),
        Err(e) => errors::join_error_to_response(e),
    }
}

/// `POST /assignments/release`: skip an assigned image before its lease expires.
pub async fn release_assignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match payload {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text()),
    };

    let orchestrator = services.orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || {
        orchestrator.release(session.session_id(), &body.lease_token)
    })
    .await;

    match result {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => errors::lease_error_to_response(e),
        Err(e) => errors::join_error_to_response(e),
    }
}
