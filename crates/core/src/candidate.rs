//! Candidates: read-only references into an external source store.

use serde::{Deserialize, Serialize};

use crate::id::{ClientId, ReadingId};
use crate::lease::LeaseKey;
use crate::utility::UtilityType;

/// Reference values the source has on record for a reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingHint {
    pub meter_no: Option<String>,
    /// Reading captured in this image, according to the source.
    pub reading_new: Option<f64>,
    /// Previous reading for the same meter.
    pub reading_old: Option<f64>,
}

impl ReadingHint {
    /// Whole-number part of `reading_new` (annotators ignore decimals).
    pub fn reading_new_whole(&self) -> Option<u64> {
        self.reading_new.and_then(whole)
    }

    pub fn reading_old_whole(&self) -> Option<u64> {
        self.reading_old.and_then(whole)
    }
}

fn whole(v: f64) -> Option<u64> {
    if v.is_finite() && v >= 0.0 {
        Some(v.trunc() as u64)
    } else {
        None
    }
}

/// An unannotated item eligible for assignment.
///
/// Never owned or mutated by this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_client: ClientId,
    pub source_reading_id: ReadingId,
    pub image_url: String,
    pub utility_type: UtilityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<ReadingHint>,
}

impl Candidate {
    pub fn key(&self) -> LeaseKey {
        LeaseKey::new(self.source_client.clone(), self.source_reading_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_readings_truncate_decimals() {
        let hint = ReadingHint {
            meter_no: Some("M-1".to_string()),
            reading_new: Some(12345.678),
            reading_old: Some(-1.0),
        };
        assert_eq!(hint.reading_new_whole(), Some(12345));
        assert_eq!(hint.reading_old_whole(), None);
    }
}
