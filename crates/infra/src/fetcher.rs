//! Pulls one unclaimed, unannotated candidate from a chosen client.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::debug;

use meterlab_core::{Candidate, ReadingId, UtilityType};

use crate::annotations::{AnnotationRepository, RepositoryError};
use crate::lease::{LeaseError, LeaseLedger};
use crate::retry::RetryPolicy;
use crate::source::{SourceClient, SourceError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The client's pool for this type is currently empty. Not fatal.
    #[error("no eligible candidate")]
    NotFound,

    /// The client's own store could not be read.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The annotation or lease store could not be read.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct CandidateFetcher<A, L> {
    annotations: A,
    leases: L,
    retry: RetryPolicy,
}

impl<A, L> CandidateFetcher<A, L>
where
    A: AnnotationRepository,
    L: LeaseLedger,
{
    pub fn new(annotations: A, leases: L, retry: RetryPolicy) -> Self {
        Self {
            annotations,
            leases,
            retry,
        }
    }

    /// Ids of `source`'s readings that are finalized or under a live lease.
    pub fn excluded_ids(&self, source: &dyn SourceClient) -> Result<HashSet<ReadingId>, FetchError> {
        let client = source.client_id();

        let mut excluded = self
            .retry
            .run("annotated_ids", RepositoryError::is_transient, || {
                self.annotations.annotated_ids(client)
            })
            .map_err(|e| FetchError::StoreUnavailable(e.to_string()))?;

        let leased = self
            .retry
            .run(
                "active_ids",
                |e: &LeaseError| matches!(e, LeaseError::Unavailable(_)),
                || self.leases.active_ids(client),
            )
            .map_err(|e| FetchError::StoreUnavailable(e.to_string()))?;

        excluded.extend(leased);
        Ok(excluded)
    }

    /// One random eligible candidate of `utility` from `source`.
    pub fn fetch<R: Rng + ?Sized>(
        &self,
        source: &dyn SourceClient,
        utility: UtilityType,
        rng: &mut R,
    ) -> Result<Candidate, FetchError> {
        let excluded = self.excluded_ids(source)?;

        let readings = self
            .retry
            .run("list_unseen", SourceError::is_transient, || {
                source.list_unseen(utility, &excluded)
            })
            .map_err(|e| FetchError::SourceUnavailable(e.to_string()))?;

        // Sources may sample or truncate the exclusion list; never trust them.
        let eligible: Vec<_> = readings
            .into_iter()
            .filter(|r| r.utility_type == utility && !excluded.contains(&r.reading_id))
            .collect();

        debug!(
            source_client = %source.client_id(),
            utility = %utility,
            excluded = excluded.len(),
            eligible = eligible.len(),
            "listed unseen readings"
        );

        eligible
            .choose(rng)
            .cloned()
            .map(|r| r.into_candidate(source.client_id().clone()))
            .ok_or(FetchError::NotFound)
    }
}
