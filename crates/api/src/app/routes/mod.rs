use axum::{
    routing::{get, post},
    Router,
};

pub mod annotations;
pub mod assignments;
pub mod stats;
pub mod system;

/// Router for every endpoint that requires a session.
pub fn router() -> Router {
    Router::new()
        .route("/assignments", post(assignments::request_assignment))
        .route("/assignments/release", post(assignments::release_assignment))
        .route("/annotations", post(annotations::submit_annotation))
        .route(
            "/annotations/:client/:reading_id",
            get(annotations::get_annotation),
        )
        .route("/stats", get(stats::get_stats))
}
