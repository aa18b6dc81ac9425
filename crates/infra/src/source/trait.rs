use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use meterlab_core::{Candidate, ClientId, Environment, ReadingHint, ReadingId, UtilityType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("no source configured for client {1} in {0}")]
    UnknownClient(Environment, ClientId),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The source answered, but not with something usable.
    #[error("source query failed: {0}")]
    Query(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// One unannotated row as reported by a source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReading {
    pub reading_id: ReadingId,
    pub image_url: String,
    pub utility_type: UtilityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<ReadingHint>,
}

impl SourceReading {
    pub fn into_candidate(self, source_client: ClientId) -> Candidate {
        Candidate {
            source_client,
            source_reading_id: self.reading_id,
            image_url: self.image_url,
            utility_type: self.utility_type,
            hint: self.hint,
        }
    }
}

/// One client's reading store.
pub trait SourceClient: Send + Sync {
    fn client_id(&self) -> &ClientId;

    /// Readings of `utility` whose id is not in `excluded`.
    ///
    /// Implementations may return a bounded random sample rather than the
    /// whole pool, and may not honour `excluded` exactly; callers filter again.
    fn list_unseen(
        &self,
        utility: UtilityType,
        excluded: &HashSet<ReadingId>,
    ) -> Result<Vec<SourceReading>, SourceError>;
}

impl<S> SourceClient for Arc<S>
where
    S: SourceClient + ?Sized,
{
    fn client_id(&self) -> &ClientId {
        (**self).client_id()
    }

    fn list_unseen(
        &self,
        utility: UtilityType,
        excluded: &HashSet<ReadingId>,
    ) -> Result<Vec<SourceReading>, SourceError> {
        (**self).list_unseen(utility, excluded)
    }
}

/// Source clients per `(environment, client)`, wired once at startup.
#[derive(Default, Clone)]
pub struct SourceDirectory {
    clients: HashMap<(Environment, ClientId), Arc<dyn SourceClient>>,
}

impl SourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, environment: Environment, client: Arc<dyn SourceClient>) {
        let id = client.client_id().clone();
        self.clients.insert((environment, id), client);
    }

    pub fn with(mut self, environment: Environment, client: Arc<dyn SourceClient>) -> Self {
        self.register(environment, client);
        self
    }

    pub fn get(
        &self,
        environment: Environment,
        client: &ClientId,
    ) -> Result<Arc<dyn SourceClient>, SourceError> {
        self.clients
            .get(&(environment, client.clone()))
            .cloned()
            .ok_or_else(|| SourceError::UnknownClient(environment, client.clone()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl core::fmt::Debug for SourceDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut keys: Vec<_> = self
            .clients
            .keys()
            .map(|(env, id)| format!("{env}/{id}"))
            .collect();
        keys.sort();
        f.debug_struct("SourceDirectory").field("clients", &keys).finish()
    }
}
