use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use meterlab_infra::{AssignError, LeaseError, RepositoryError, SubmitError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_unavailable(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
}

pub fn assign_error_to_response(err: AssignError) -> axum::response::Response {
    match err {
        AssignError::Exhausted { .. } => json_error(
            StatusCode::NOT_FOUND,
            "no_work_available",
            "no eligible work currently available",
        ),
        AssignError::NoSources(env) => json_error(
            StatusCode::NOT_FOUND,
            "no_work_available",
            format!("no source clients configured for environment {env}"),
        ),
        AssignError::StoreUnavailable(msg) => store_unavailable(msg),
    }
}

pub fn lease_error_to_response(err: LeaseError) -> axum::response::Response {
    match err {
        LeaseError::NotHolder(key) => json_error(
            StatusCode::CONFLICT,
            "not_holder",
            format!("lease on {key} is held by another session"),
        ),
        LeaseError::NotFound(key) => json_error(
            StatusCode::NOT_FOUND,
            "lease_not_found",
            format!("no live lease on {key}"),
        ),
        // Never produced by release; kept total for the match.
        LeaseError::AlreadyLeased(key) => json_error(
            StatusCode::CONFLICT,
            "already_leased",
            format!("{key} is leased by another session"),
        ),
        LeaseError::InvalidTtl(msg) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "invalid_lease_ttl",
            msg,
        ),
        LeaseError::Unavailable(msg) => store_unavailable(msg),
    }
}

/// `Duplicate { matches: true }` is an idempotent success and handled by the caller.
pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::LeaseExpired(key) => json_error(
            StatusCode::GONE,
            "lease_expired",
            format!("lease on {key} expired or is held by another session"),
        ),
        SubmitError::Duplicate { existing, .. } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "duplicate_annotation",
                "message": format!("annotation for {} already exists", existing.key()),
                "existing": existing,
            })),
        )
            .into_response(),
        SubmitError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        SubmitError::StoreUnavailable(msg) => store_unavailable(msg),
    }
}

pub fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    store_unavailable(err.to_string())
}

pub fn join_error_to_response(err: tokio::task::JoinError) -> axum::response::Response {
    tracing::error!(error = %err, "blocking task failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
}
