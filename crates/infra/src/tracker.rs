//! Current class mix, read from the durable annotation store on every call.

use tracing::instrument;

use meterlab_scheduler::{ClassCounts, Fractions};

use crate::annotations::{AnnotationRepository, RepositoryError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct DistributionTracker<A> {
    annotations: A,
    retry: RetryPolicy,
}

impl<A: AnnotationRepository> DistributionTracker<A> {
    pub fn new(annotations: A, retry: RetryPolicy) -> Self {
        Self { annotations, retry }
    }

    #[instrument(skip(self), err)]
    pub fn counts(&self) -> Result<ClassCounts, RepositoryError> {
        self.retry.run(
            "class_counts",
            RepositoryError::is_transient,
            || self.annotations.class_counts(),
        )
    }

    /// `None` in the initial state, before any typed detection exists.
    pub fn fractions(&self) -> Result<Option<Fractions>, RepositoryError> {
        Ok(self.counts()?.fractions())
    }
}
