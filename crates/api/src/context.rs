use meterlab_core::SessionId;

/// Identity of the annotator session making a request.
///
/// Supplied by the upstream authentication layer through headers and
/// immutable for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    session_id: SessionId,
    annotator: String,
}

impl SessionContext {
    pub fn new(session_id: SessionId, annotator: String) -> Self {
        Self {
            session_id,
            annotator,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Name recorded as `annotated_by`.
    pub fn annotator(&self) -> &str {
        &self.annotator
    }
}
