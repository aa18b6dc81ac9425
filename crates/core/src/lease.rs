//! Leases: time-bounded exclusive claims on a candidate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::id::{ClientId, ReadingId, SessionId};

/// Uniqueness key shared by leases and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseKey {
    pub source_client: ClientId,
    pub source_reading_id: ReadingId,
}

impl LeaseKey {
    pub fn new(source_client: ClientId, source_reading_id: ReadingId) -> Self {
        Self {
            source_client,
            source_reading_id,
        }
    }
}

impl core::fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.source_client, self.source_reading_id)
    }
}

/// Handle returned to the annotator with an assignment.
///
/// The nonce distinguishes successive leases on the same key, so a token from
/// an expired lease never validates against a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken {
    pub source_client: ClientId,
    pub source_reading_id: ReadingId,
    pub nonce: Uuid,
}

impl LeaseToken {
    pub fn key(&self) -> LeaseKey {
        LeaseKey::new(self.source_client.clone(), self.source_reading_id)
    }
}

impl core::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}#{}", self.source_client, self.source_reading_id, self.nonce)
    }
}

/// A claim on `(source_client, source_reading_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub key: LeaseKey,
    /// Carried so the annotation row can be written without re-reading the source.
    pub image_url: String,
    pub holder_session_id: SessionId,
    pub nonce: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Fails when `ttl` is not positive or pushes the expiry past the
    /// representable range.
    pub fn new(
        key: LeaseKey,
        image_url: impl Into<String>,
        holder_session_id: SessionId,
        acquired_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> DomainResult<Self> {
        if ttl <= chrono::Duration::zero() {
            return Err(DomainError::validation(format!("lease ttl must be positive, got {ttl}")));
        }
        let expires_at = acquired_at
            .checked_add_signed(ttl)
            .ok_or_else(|| DomainError::validation(format!("lease ttl {ttl} overflows the expiry")))?;
        Ok(Self {
            key,
            image_url: image_url.into(),
            holder_session_id,
            nonce: Uuid::now_v7(),
            acquired_at,
            expires_at,
        })
    }

    /// A lease is gone once its TTL has fully elapsed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, session: &SessionId) -> bool {
        &self.holder_session_id == session
    }

    pub fn token(&self) -> LeaseToken {
        LeaseToken {
            source_client: self.key.source_client.clone(),
            source_reading_id: self.key.source_reading_id,
            nonce: self.nonce,
        }
    }

    pub fn matches_token(&self, token: &LeaseToken) -> bool {
        self.nonce == token.nonce
            && self.key.source_client == token.source_client
            && self.key.source_reading_id == token.source_reading_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(ttl_secs: i64) -> (Lease, DateTime<Utc>) {
        let now = Utc::now();
        let key = LeaseKey::new(ClientId::new("MRC").unwrap(), ReadingId::new(1));
        let lease = Lease::new(
            key,
            "https://example.test/1.jpg",
            SessionId::new("s1").unwrap(),
            now,
            chrono::Duration::seconds(ttl_secs),
        )
        .unwrap();
        (lease, now)
    }

    #[test]
    fn expires_exactly_at_ttl() {
        let (lease, now) = lease(30);
        assert!(!lease.is_expired_at(now));
        assert!(!lease.is_expired_at(now + chrono::Duration::milliseconds(29_999)));
        assert!(lease.is_expired_at(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn unrepresentable_or_empty_ttl_is_rejected() {
        let key = LeaseKey::new(ClientId::new("MRC").unwrap(), ReadingId::new(2));
        let session = SessionId::new("s1").unwrap();
        for ttl in [
            chrono::Duration::zero(),
            chrono::Duration::seconds(-5),
            chrono::Duration::seconds(10_000_000_000_000),
        ] {
            assert!(matches!(
                Lease::new(key.clone(), "u", session.clone(), Utc::now(), ttl),
                Err(DomainError::Validation(_))
            ));
        }
    }

    #[test]
    fn token_matches_only_its_own_lease() {
        let (a, _) = lease(30);
        let (b, _) = lease(30);
        assert!(a.matches_token(&a.token()));
        assert!(!a.matches_token(&b.token()));
        assert_eq!(a.token().key(), a.key);
    }
}
