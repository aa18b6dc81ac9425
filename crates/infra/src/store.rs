//! Finalizing annotations exactly once.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use meterlab_core::{
    Annotation, Detection, DetectionRecord, DomainError, LeaseKey, LeaseToken, NewAnnotation, SessionId,
};

use crate::annotations::{AnnotationRepository, RepositoryError};
use crate::lease::LeaseLedger;

#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    /// The token no longer identifies a live lease held by the caller.
    #[error("lease on {0} expired or is held by another session")]
    LeaseExpired(LeaseKey),

    /// The key is already finalized. `matches` is true when the stored row
    /// carries the same detections and annotator as this submission, which
    /// callers may treat as an idempotent success.
    #[error("annotation for {} already exists", .existing.key())]
    Duplicate {
        existing: Box<Annotation>,
        matches: bool,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<RepositoryError> for SubmitError {
    fn from(err: RepositoryError) -> Self {
        SubmitError::StoreUnavailable(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AnnotationStore<A, L> {
    annotations: A,
    leases: L,
}

impl<A, L> AnnotationStore<A, L>
where
    A: AnnotationRepository,
    L: LeaseLedger,
{
    pub fn new(annotations: A, leases: L) -> Self {
        Self {
            annotations,
            leases,
        }
    }

    /// Finalize the leased item with `detections`.
    ///
    /// Never retried internally: a caller that saw `StoreUnavailable` should
    /// resubmit with the same token, which resolves to `Duplicate { matches:
    /// true }` if the first attempt did land.
    #[instrument(
        skip_all,
        fields(session_id = %session, lease = %token, detection_count = detections.len())
    )]
    pub fn submit(
        &self,
        session: &SessionId,
        token: &LeaseToken,
        detections: &[DetectionRecord],
        annotated_by: &str,
    ) -> Result<Annotation, SubmitError> {
        let key = token.key();

        let live = self
            .leases
            .get(&key)
            .map_err(|e| SubmitError::StoreUnavailable(e.to_string()))?
            .filter(|lease| lease.matches_token(token) && lease.is_held_by(session));

        let Some(lease) = live else {
            return Err(self.resolve_without_lease(key, detections, annotated_by));
        };

        if annotated_by.trim().is_empty() {
            return Err(SubmitError::Validation("annotated_by must not be empty".to_string()));
        }
        let detections = Detection::validate_all(detections).map_err(|e| match e {
            DomainError::Validation(msg) => SubmitError::Validation(msg),
            other => SubmitError::Validation(other.to_string()),
        })?;

        let new = NewAnnotation {
            source_client: key.source_client.clone(),
            source_reading_id: key.source_reading_id,
            image_url: lease.image_url.clone(),
            detections,
            annotated_by: annotated_by.to_string(),
        };

        match self.annotations.insert(new.clone()) {
            Ok(row) => {
                self.release_after_finalize(&key, session);
                info!(annotation_id = %row.id, meters = row.meter_count(), "annotation finalized");
                Ok(row)
            }
            Err(RepositoryError::Duplicate(existing)) => {
                self.release_after_finalize(&key, session);
                let matches = existing.matches(&new);
                warn!(matches, "key already finalized");
                Err(SubmitError::Duplicate { existing, matches })
            }
            Err(e) => {
                warn!(error = %e, "annotation insert failed");
                Err(e.into())
            }
        }
    }

    /// No live lease: either the work already landed, or the lease is gone.
    fn resolve_without_lease(
        &self,
        key: LeaseKey,
        detections: &[DetectionRecord],
        annotated_by: &str,
    ) -> SubmitError {
        match self.annotations.get(&key) {
            Ok(Some(existing)) => {
                let matches = Detection::validate_all(detections)
                    .map(|d| existing.detections == d && existing.annotated_by == annotated_by)
                    .unwrap_or(false);
                debug!(matches, "submission without live lease resolved against stored row");
                SubmitError::Duplicate {
                    existing: Box::new(existing),
                    matches,
                }
            }
            Ok(None) => SubmitError::LeaseExpired(key),
            Err(e) => e.into(),
        }
    }

    fn release_after_finalize(&self, key: &LeaseKey, session: &SessionId) {
        // The row is already durable. A lease left behind expires on its own.
        if let Err(e) = self.leases.release(key, session) {
            debug!(lease = %key, error = %e, "lease release after finalize failed");
        }
    }

    pub fn get(&self, key: &LeaseKey) -> Result<Option<Annotation>, RepositoryError> {
        self.annotations.get(key)
    }
}
