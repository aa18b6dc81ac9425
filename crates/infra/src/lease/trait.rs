use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use meterlab_core::{ClientId, Lease, LeaseKey, ReadingId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// Another session holds an unexpired lease on the key.
    #[error("already leased: {0}")]
    AlreadyLeased(LeaseKey),

    /// The caller is not the holder of the live lease.
    #[error("lease on {0} is held by another session")]
    NotHolder(LeaseKey),

    /// No live lease exists for the key.
    #[error("no live lease on {0}")]
    NotFound(LeaseKey),

    /// The requested lifetime cannot produce a valid expiry.
    #[error("invalid lease ttl: {0}")]
    InvalidTtl(String),

    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

/// Lease storage boundary.
///
/// `acquire` is an atomic check-and-insert: under concurrent calls on one key
/// exactly one caller wins and the rest get [`LeaseError::AlreadyLeased`].
pub trait LeaseLedger: Send + Sync {
    fn acquire(
        &self,
        key: &LeaseKey,
        image_url: &str,
        session: &SessionId,
        ttl: chrono::Duration,
    ) -> Result<Lease, LeaseError>;

    /// Only the current holder may release.
    fn release(&self, key: &LeaseKey, session: &SessionId) -> Result<(), LeaseError>;

    /// The live lease on `key`, if any.
    fn get(&self, key: &LeaseKey) -> Result<Option<Lease>, LeaseError>;

    /// Reading ids of `client` currently under a live lease.
    fn active_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, LeaseError>;

    /// Physically drop expired leases. Returns how many were removed.
    fn purge_expired(&self) -> Result<usize, LeaseError>;
}

impl<L> LeaseLedger for Arc<L>
where
    L: LeaseLedger + ?Sized,
{
    fn acquire(
        &self,
        key: &LeaseKey,
        image_url: &str,
        session: &SessionId,
        ttl: chrono::Duration,
    ) -> Result<Lease, LeaseError> {
        (**self).acquire(key, image_url, session, ttl)
    }

    fn release(&self, key: &LeaseKey, session: &SessionId) -> Result<(), LeaseError> {
        (**self).release(key, session)
    }

    fn get(&self, key: &LeaseKey) -> Result<Option<Lease>, LeaseError> {
        (**self).get(key)
    }

    fn active_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, LeaseError> {
        (**self).active_ids(client)
    }

    fn purge_expired(&self) -> Result<usize, LeaseError> {
        (**self).purge_expired()
    }
}
