use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use meterlab_core::{
    Annotation, AnnotationId, Clock, ClientId, LeaseKey, NewAnnotation, ReadingId, SystemClock,
};
use meterlab_scheduler::ClassCounts;

use super::r#trait::{AnnotationRepository, RepositoryError};

#[derive(Default)]
struct Table {
    rows: HashMap<LeaseKey, Annotation>,
    last_id: i64,
}

/// In-memory annotation table for tests and dev.
pub struct InMemoryAnnotationRepository {
    table: RwLock<Table>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAnnotationRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAnnotationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for InMemoryAnnotationRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryAnnotationRepository")
            .field("rows", &self.len())
            .finish()
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Unavailable("annotation table lock poisoned".to_string())
}

impl AnnotationRepository for InMemoryAnnotationRepository {
    fn insert(&self, new: NewAnnotation) -> Result<Annotation, RepositoryError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;
        let key = new.key();

        if let Some(existing) = table.rows.get(&key) {
            return Err(RepositoryError::Duplicate(Box::new(existing.clone())));
        }

        table.last_id += 1;
        let row = Annotation::from_new(AnnotationId::new(table.last_id), new, self.clock.now());
        table.rows.insert(key, row.clone());
        Ok(row)
    }

    fn get(&self, key: &LeaseKey) -> Result<Option<Annotation>, RepositoryError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table.rows.get(key).cloned())
    }

    fn annotated_ids(&self, client: &ClientId) -> Result<HashSet<ReadingId>, RepositoryError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        Ok(table
            .rows
            .keys()
            .filter(|k| &k.source_client == client)
            .map(|k| k.source_reading_id)
            .collect())
    }

    fn class_counts(&self) -> Result<ClassCounts, RepositoryError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        let mut counts = ClassCounts::default();
        for row in table.rows.values() {
            counts.total_images += 1;
            if row.detections.is_empty() {
                counts.no_meter += 1;
            }
            for d in &row.detections {
                counts.add(d.class, 1);
            }
        }
        Ok(counts)
    }
}
