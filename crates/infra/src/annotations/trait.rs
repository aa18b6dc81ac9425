use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use meterlab_core::{Annotation, ClientId, LeaseKey, NewAnnotation, ReadingId};
use meterlab_scheduler::ClassCounts;

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The key was already finalized. Carries the row that won.
    #[error("annotation for {} already exists", .0.key())]
    Duplicate(Box<Annotation>),

    #[error("annotation store unavailable: {0}")]
    Unavailable(String),

    /// The detections could not be encoded for storage. Nothing was written.
    #[error("annotation could not be encoded: {0}")]
    Encode(String),

    /// A stored row could not be decoded.
    #[error("corrupt annotation row: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

/// Annotation storage boundary.
///
/// `(source_client, source_reading_id)` is unique across every row ever
/// inserted. A second insert for a key fails with
/// [`RepositoryError::Duplicate`] and never overwrites.
pub trait AnnotationRepository: Send + Sync {
    fn insert(&self, new: NewAnnotation) -> Result<Annotation, RepositoryError>;

    fn get(&self, key: &LeaseKey) -> Result<Option<Annotation>, RepositoryError>;

    /// Reading ids of `client` that already have a row.
    fn annotated_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, RepositoryError>;

    /// Per-class detection counts plus image totals.
    fn class_counts(&self) -> Result<ClassCounts, RepositoryError>;
}

impl<R> AnnotationRepository for Arc<R>
where
    R: AnnotationRepository + ?Sized,
{
    fn insert(&self, new: NewAnnotation) -> Result<Annotation, RepositoryError> {
        (**self).insert(new)
    }

    fn get(&self, key: &LeaseKey) -> Result<Option<Annotation>, RepositoryError> {
        (**self).get(key)
    }

    fn annotated_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, RepositoryError> {
        (**self).annotated_ids(client)
    }

    fn class_counts(&self) -> Result<ClassCounts, RepositoryError> {
        (**self).class_counts()
    }
}
