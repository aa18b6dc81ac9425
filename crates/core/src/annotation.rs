//! Finalized annotations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::{Detection, DetectionRecord};
use crate::id::{AnnotationId, ClientId, ReadingId};
use crate::lease::LeaseKey;
use crate::utility::UtilityType;

/// An annotation about to be inserted (no id / timestamp yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnnotation {
    pub source_client: ClientId,
    pub source_reading_id: ReadingId,
    pub image_url: String,
    /// Empty means "confirmed: no meter present".
    pub detections: Vec<Detection>,
    pub annotated_by: String,
}

impl NewAnnotation {
    pub fn key(&self) -> LeaseKey {
        LeaseKey::new(self.source_client.clone(), self.source_reading_id)
    }
}

/// A completed, immutable annotation row.
///
/// `(source_client, source_reading_id)` is unique across every row ever created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub source_client: ClientId,
    pub source_reading_id: ReadingId,
    pub image_url: String,
    pub detections: Vec<Detection>,
    pub annotated_by: String,
    pub annotated_at: DateTime<Utc>,
}

impl Annotation {
    /// Materialize a stored row from a pending insert.
    pub fn from_new(id: AnnotationId, new: NewAnnotation, annotated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            source_client: new.source_client,
            source_reading_id: new.source_reading_id,
            image_url: new.image_url,
            detections: new.detections,
            annotated_by: new.annotated_by,
            annotated_at,
        }
    }

    pub fn key(&self) -> LeaseKey {
        LeaseKey::new(self.source_client.clone(), self.source_reading_id)
    }

    pub fn has_meters(&self) -> bool {
        !self.detections.is_empty()
    }

    pub fn meter_count(&self) -> usize {
        self.detections.len()
    }

    pub fn is_multi_meter(&self) -> bool {
        self.detections.len() > 1
    }

    /// Count of detections with the given class.
    pub fn count_of(&self, class: UtilityType) -> usize {
        self.detections.iter().filter(|d| d.class == class).count()
    }

    /// Whether a resubmission carries the same content as this row.
    ///
    /// Id and timestamp are ignored; image url is fixed by the key.
    pub fn matches(&self, new: &NewAnnotation) -> bool {
        self.source_client == new.source_client
            && self.source_reading_id == new.source_reading_id
            && self.detections == new.detections
            && self.annotated_by == new.annotated_by
    }

    /// The `detections` column value.
    pub fn detections_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        detections_to_json(&self.detections)
    }
}

/// Serialize detections into the canonical ordered list.
///
/// An empty list is a real answer ("no meter present"), so encoding failures
/// are returned rather than collapsed into one.
pub fn detections_to_json(detections: &[Detection]) -> Result<serde_json::Value, serde_json::Error> {
    let records: Vec<DetectionRecord> = detections.iter().cloned().map(Into::into).collect();
    serde_json::to_value(records)
}

/// Parse the `detections` column value back into validated detections.
pub fn detections_from_json(value: serde_json::Value) -> Result<Vec<Detection>, String> {
    let records: Vec<DetectionRecord> =
        serde_json::from_value(value).map_err(|e| format!("malformed detections column: {e}"))?;
    Detection::validate_all(&records).map_err(|e| e.to_string())
}
