//! One assignment cycle: draw a type, pick a client, fetch, claim.
//!
//! Lost claim races and empty pools are retried with fresh draws up to
//! `max_attempts` times and never reach the caller; after that the request is
//! reported as exhausted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use meterlab_core::{Candidate, Environment, LeaseToken, SessionId, SourceRegistry};
use meterlab_scheduler::{Balancer, ClientSelector};

use crate::annotations::AnnotationRepository;
use crate::fetcher::{CandidateFetcher, FetchError};
use crate::lease::{LeaseError, LeaseLedger};
use crate::retry::RetryPolicy;
use crate::source::SourceDirectory;
use crate::tracker::DistributionTracker;

/// Default lease lifetime.
pub const DEFAULT_LEASE_TTL_SECS: i64 = 900;

/// Default bound on cycles per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignError {
    /// No eligible, unclaimed item was reachable within the attempt budget.
    #[error("no eligible work currently available (gave up after {attempts} attempts)")]
    Exhausted { attempts: u32 },

    #[error("no source clients configured for environment {0}")]
    NoSources(Environment),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

/// What an annotator gets back: the item and the handle to finalize it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub candidate: Candidate,
    pub lease_token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AssignmentSettings {
    pub balancer: Balancer,
    pub lease_ttl: chrono::Duration,
    pub max_attempts: u32,
    pub read_retry: RetryPolicy,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            balancer: Balancer::default(),
            lease_ttl: chrono::Duration::seconds(DEFAULT_LEASE_TTL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            read_retry: RetryPolicy::default(),
        }
    }
}

/// Why a single cycle did not produce an assignment.
enum CycleOutcome {
    Assigned(Assignment),
    /// Retry with a fresh draw.
    Failed(&'static str),
}

pub struct AssignmentOrchestrator<A, L> {
    registry: Arc<SourceRegistry>,
    sources: Arc<SourceDirectory>,
    annotations: A,
    leases: L,
    tracker: DistributionTracker<A>,
    fetcher: CandidateFetcher<A, L>,
    settings: AssignmentSettings,
}

impl<A, L> AssignmentOrchestrator<A, L>
where
    A: AnnotationRepository + Clone,
    L: LeaseLedger + Clone,
{
    pub fn new(
        registry: Arc<SourceRegistry>,
        sources: Arc<SourceDirectory>,
        annotations: A,
        leases: L,
        settings: AssignmentSettings,
    ) -> Self {
        let tracker = DistributionTracker::new(annotations.clone(), settings.read_retry.clone());
        let fetcher = CandidateFetcher::new(
            annotations.clone(),
            leases.clone(),
            settings.read_retry.clone(),
        );
        Self {
            registry,
            sources,
            annotations,
            leases,
            tracker,
            fetcher,
            settings,
        }
    }

    pub fn settings(&self) -> &AssignmentSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &DistributionTracker<A> {
        &self.tracker
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn request_assignment(
        &self,
        session: &SessionId,
        environment: Environment,
    ) -> Result<Assignment, AssignError> {
        self.request_assignment_with(session, environment, &mut rand::thread_rng())
    }

    /// Same as [`request_assignment`](Self::request_assignment) with an injected
    /// random source.
    #[instrument(skip_all, fields(session_id = %session, environment = %environment))]
    pub fn request_assignment_with<R: Rng + ?Sized>(
        &self,
        session: &SessionId,
        environment: Environment,
        rng: &mut R,
    ) -> Result<Assignment, AssignError> {
        if self.registry.clients_for(environment).is_empty() {
            return Err(AssignError::NoSources(environment));
        }

        let fractions = self.tracker.fractions().map_err(|e| {
            warn!(error = %e, "could not read class counts");
            AssignError::StoreUnavailable(e.to_string())
        })?;

        let attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.run_cycle(session, environment, fractions.as_ref(), rng)? {
                CycleOutcome::Assigned(assignment) => {
                    info!(
                        attempt,
                        source_client = %assignment.candidate.source_client,
                        source_reading_id = %assignment.candidate.source_reading_id,
                        utility = %assignment.candidate.utility_type,
                        "assignment granted"
                    );
                    return Ok(assignment);
                }
                CycleOutcome::Failed(reason) => {
                    debug!(attempt, reason, "assignment attempt failed");
                }
            }
        }

        info!(attempts, "no eligible work currently available");
        Err(AssignError::Exhausted { attempts })
    }

    fn run_cycle<R: Rng + ?Sized>(
        &self,
        session: &SessionId,
        environment: Environment,
        fractions: Option<&meterlab_scheduler::Fractions>,
        rng: &mut R,
    ) -> Result<CycleOutcome, AssignError> {
        let utility = self.settings.balancer.choose(fractions, rng);
        let Some(client) = ClientSelector::select(&self.registry, environment, utility, rng) else {
            return Err(AssignError::NoSources(environment));
        };

        let source = match self.sources.get(environment, &client.id) {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "registry client has no source wired");
                return Ok(CycleOutcome::Failed("unknown client"));
            }
        };

        let candidate = match self.fetcher.fetch(&*source, utility, rng) {
            Ok(candidate) => candidate,
            Err(FetchError::NotFound) => return Ok(CycleOutcome::Failed("pool empty")),
            Err(FetchError::SourceUnavailable(e)) => {
                warn!(source_client = %client.id, error = %e, "source unavailable");
                return Ok(CycleOutcome::Failed("source unavailable"));
            }
            Err(FetchError::StoreUnavailable(e)) => {
                warn!(error = %e, "store unavailable while fetching");
                return Err(AssignError::StoreUnavailable(e));
            }
        };

        let key = candidate.key();
        let lease = match self
            .leases
            .acquire(&key, &candidate.image_url, session, self.settings.lease_ttl)
        {
            Ok(lease) => lease,
            Err(LeaseError::AlreadyLeased(_)) => return Ok(CycleOutcome::Failed("claim race lost")),
            Err(e) => {
                warn!(error = %e, "lease store unavailable");
                return Err(AssignError::StoreUnavailable(e.to_string()));
            }
        };

        // A finalization may have landed between fetch and claim.
        match self.annotations.get(&key) {
            Ok(None) => {}
            Ok(Some(_)) => {
                self.release_quietly(&key, session);
                return Ok(CycleOutcome::Failed("finalized before claim"));
            }
            Err(e) => {
                self.release_quietly(&key, session);
                warn!(error = %e, "annotation store unavailable during recheck");
                return Err(AssignError::StoreUnavailable(e.to_string()));
            }
        }

        Ok(CycleOutcome::Assigned(Assignment {
            lease_token: lease.token(),
            expires_at: lease.expires_at,
            candidate,
        }))
    }

    fn release_quietly(&self, key: &meterlab_core::LeaseKey, session: &SessionId) {
        if let Err(e) = self.leases.release(key, session) {
            debug!(lease = %key, error = %e, "release after recheck failed");
        }
    }

    /// Give an assignment back before its TTL (skip).
    ///
    /// The token must identify the caller's live lease.
    #[instrument(skip_all, fields(session_id = %session, lease = %token))]
    pub fn release(&self, session: &SessionId, token: &LeaseToken) -> Result<(), LeaseError> {
        let key = token.key();
        match self.leases.get(&key)? {
            None => Err(LeaseError::NotFound(key)),
            Some(lease) if !lease.matches_token(token) || !lease.is_held_by(session) => {
                Err(LeaseError::NotHolder(key))
            }
            Some(_) => self.leases.release(&key, session),
        }
    }
}
