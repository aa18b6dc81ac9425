use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use meterlab_core::{ClientId, LeaseKey, ReadingId};
use meterlab_infra::SubmitError;

use crate::app::dto::{SubmitRequest, SubmitResponse};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::SessionContext;

/// `POST /annotations`: finalize the leased item.
///
/// A resubmission identical to the stored row answers 200 with
/// `idempotent: true` instead of a conflict.
pub async fn submit_annotation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match payload {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text()),
    };

    let store = services.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.submit(
            session.session_id(),
            &body.lease_token,
            &body.detections,
            session.annotator(),
        )
    })
    .await;

    match result {
        Ok(Ok(annotation)) => (
            StatusCode::CREATED,
            Json(SubmitResponse {
                annotation,
                idempotent: false,
            }),
        )
            .into_response(),
        Ok(Err(SubmitError::Duplicate {
            existing,
            matches: true,
        })) => (
            StatusCode::OK,
            Json(SubmitResponse {
                annotation: *existing,
                idempotent: true,
            }),
        )
            .into_response(),
        Ok(Err(e)) => errors::submit_error_to_response(e),
        Err(e) => errors::join_error_to_response(e),
    }
}

/// `GET /annotations/:client/:reading_id`. An empty `detections` list is a
/// stored "no meter" answer; 404 means nothing was stored.
pub async fn get_annotation(
    Extension(services): Extension<Arc<AppServices>>,
    Path((client, reading_id)): Path<(String, i64)>,
) -> axum::response::Response {
    let client = match ClientId::new(client) {
        Ok(c) => c,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };
    let key = LeaseKey::new(client, ReadingId::new(reading_id));

    let store = services.store.clone();
    let lookup = key.clone();
    let result = tokio::task::spawn_blocking(move || store.get(&lookup)).await;

    match result {
        Ok(Ok(Some(annotation))) => (StatusCode::OK, Json(annotation)).into_response(),
        Ok(Ok(None)) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no annotation for {key}"),
        ),
        Ok(Err(e)) => errors::repository_error_to_response(e),
        Err(e) => errors::join_error_to_response(e),
    }
}
