use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use meterlab_core::{ClientId, ReadingId, UtilityType};

use super::r#trait::{SourceClient, SourceError, SourceReading};

/// Fixed pool of readings held in memory.
///
/// Used in tests and when no source database is configured. Can be switched
/// offline to exercise unavailability paths.
#[derive(Debug)]
pub struct InMemorySourceClient {
    id: ClientId,
    readings: RwLock<Vec<SourceReading>>,
    online: AtomicBool,
}

impl InMemorySourceClient {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            readings: RwLock::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    pub fn with_readings(id: ClientId, readings: Vec<SourceReading>) -> Self {
        let client = Self::new(id);
        client.extend(readings);
        client
    }

    pub fn push(&self, reading: SourceReading) {
        self.extend([reading]);
    }

    pub fn extend(&self, readings: impl IntoIterator<Item = SourceReading>) {
        let mut pool = self.readings.write().unwrap_or_else(|p| p.into_inner());
        pool.extend(readings);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl SourceClient for InMemorySourceClient {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn list_unseen(
        &self,
        utility: UtilityType,
        excluded: &HashSet<ReadingId>,
    ) -> Result<Vec<SourceReading>, SourceError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(format!("{} is offline", self.id)));
        }
        let pool = self
            .readings
            .read()
            .map_err(|_| SourceError::Unavailable("reading pool lock poisoned".to_string()))?;
        Ok(pool
            .iter()
            .filter(|r| r.utility_type == utility && !excluded.contains(&r.reading_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(id: i64, utility: UtilityType) -> SourceReading {
        SourceReading {
            reading_id: ReadingId::new(id),
            image_url: format!("https://example.test/{id}.jpg"),
            utility_type: utility,
            hint: None,
        }
    }

    #[test]
    fn filters_by_type_and_exclusions() {
        let client = InMemorySourceClient::with_readings(
            ClientId::new("MRC").unwrap(),
            vec![
                reading(1, UtilityType::ColdWater),
                reading(2, UtilityType::ColdWater),
                reading(3, UtilityType::Electricity),
            ],
        );
        let excluded = HashSet::from([ReadingId::new(1)]);
        let unseen = client.list_unseen(UtilityType::ColdWater, &excluded).unwrap();
        assert_eq!(unseen, vec![reading(2, UtilityType::ColdWater)]);
    }

    #[test]
    fn offline_client_reports_unavailable() {
        let client = InMemorySourceClient::new(ClientId::new("MRC").unwrap());
        client.set_online(false);
        let err = client
            .list_unseen(UtilityType::HotWater, &HashSet::new())
            .unwrap_err();
        assert!(err.is_transient());
    }
}
