use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use meterlab_core::SessionId;

use crate::app::errors::json_error;
use crate::context::SessionContext;

pub const SESSION_HEADER: &str = "x-session-id";
pub const ANNOTATOR_HEADER: &str = "x-annotator";

/// Attach a [`SessionContext`] built from the identity headers.
///
/// `x-session-id` is required. `x-annotator` defaults to the session id.
pub async fn session_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ctx = match extract_session(req.headers()) {
        Some(ctx) => ctx,
        None => {
            return json_error(
                StatusCode::UNAUTHORIZED,
                "missing_session",
                format!("{SESSION_HEADER} header is required"),
            );
        }
    };

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn extract_session(headers: &HeaderMap) -> Option<SessionContext> {
    let session_id = SessionId::new(header_value(headers, SESSION_HEADER)?).ok()?;
    let annotator = header_value(headers, ANNOTATOR_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| session_id.to_string());
    Some(SessionContext::new(session_id, annotator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn annotator_defaults_to_session() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("sess-1"));
        let ctx = extract_session(&headers).unwrap();
        assert_eq!(ctx.session_id().as_str(), "sess-1");
        assert_eq!(ctx.annotator(), "sess-1");

        headers.insert(ANNOTATOR_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(extract_session(&headers).unwrap().annotator(), "alice");
    }

    #[test]
    fn blank_session_is_rejected() {
        let mut headers = HeaderMap::new();
        assert!(extract_session(&headers).is_none());
        headers.insert(SESSION_HEADER, HeaderValue::from_static("   "));
        assert!(extract_session(&headers).is_none());
    }
}
