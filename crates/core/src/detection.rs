//! Meter detections and their persisted wire form.
//!
//! A [`Detection`] is always valid by construction. The only way to obtain one
//! from untrusted input is [`Detection::try_from`] on a [`DetectionRecord`],
//! which is exactly the object stored in the `detections` column:
//!
//! ```json
//! {"class_label": 0, "obb": [x1, y1, x2, y2, x3, y3, x4, y4], "annotator_reading": 12345}
//! ```
//!
//! Corners are ordered counter-clockwise as seen on the image (top-left,
//! bottom-left, bottom-right, top-right for an unrotated box) and normalized to
//! `[0, 1]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DomainError;
use crate::utility::UtilityType;

/// A single normalized image coordinate.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Oriented bounding box: four ordered corners.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrientedBox {
    corners: [Point; 4],
}

impl OrientedBox {
    /// Build a box, rejecting coordinates outside `[0, 1]` (and NaN).
    pub fn new(corners: [Point; 4]) -> Result<Self, DetectionError> {
        for (i, p) in corners.iter().enumerate() {
            for value in [p.x, p.y] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(DetectionError::CoordinateOutOfRange { index: i, value });
                }
            }
        }
        Ok(Self { corners })
    }

    /// Build from the flat `[x1, y1, .., x4, y4]` storage layout.
    pub fn from_flat(coords: &[f64]) -> Result<Self, DetectionError> {
        if coords.len() != 8 {
            return Err(DetectionError::CornerCount(coords.len()));
        }
        let corners = [
            Point::new(coords[0], coords[1]),
            Point::new(coords[2], coords[3]),
            Point::new(coords[4], coords[5]),
            Point::new(coords[6], coords[7]),
        ];
        Self::new(corners)
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn to_flat(&self) -> [f64; 8] {
        let c = &self.corners;
        [c[0].x, c[0].y, c[1].x, c[1].y, c[2].x, c[2].y, c[3].x, c[3].y]
    }
}

/// Reasons a detection payload is rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectionError {
    #[error("unknown class_label {0} (expected 0=cold_water, 1=hot_water, 2=electricity)")]
    UnknownClass(i64),

    #[error("obb must have exactly 4 corners (8 numbers), got {0} numbers")]
    CornerCount(usize),

    #[error("corner {index} has coordinate {value} outside [0, 1]")]
    CoordinateOutOfRange { index: usize, value: f64 },

    #[error("annotator_reading must be non-negative, got {0}")]
    NegativeReading(i64),
}

/// Persisted/wire form of a detection. Field names and types are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionRecord {
    pub class_label: i64,
    pub obb: Vec<f64>,
    #[serde(default)]
    pub annotator_reading: Option<i64>,
}

/// A validated meter detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "DetectionRecord", try_from = "DetectionRecord")]
pub struct Detection {
    pub class: UtilityType,
    pub obb: OrientedBox,
    /// Whole-number reading typed by the annotator. Never negative.
    reading_value: Option<i64>,
}

impl Detection {
    pub fn new(
        class: UtilityType,
        obb: OrientedBox,
        reading_value: Option<i64>,
    ) -> Result<Self, DetectionError> {
        if let Some(v) = reading_value.filter(|v| *v < 0) {
            return Err(DetectionError::NegativeReading(v));
        }
        Ok(Self {
            class,
            obb,
            reading_value,
        })
    }

    pub fn reading_value(&self) -> Option<i64> {
        self.reading_value
    }

    /// Validate a whole submission. An empty slice is valid ("no meter present").
    pub fn validate_all(records: &[DetectionRecord]) -> Result<Vec<Detection>, DomainError> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                Detection::try_from(r.clone())
                    .map_err(|e| DomainError::validation(format!("detection {i}: {e}")))
            })
            .collect()
    }
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = DetectionError;

    fn try_from(record: DetectionRecord) -> Result<Self, Self::Error> {
        let class = UtilityType::from_class_label(record.class_label)
            .ok_or(DetectionError::UnknownClass(record.class_label))?;
        let obb = OrientedBox::from_flat(&record.obb)?;
        Detection::new(class, obb, record.annotator_reading)
    }
}

impl From<Detection> for DetectionRecord {
    fn from(d: Detection) -> Self {
        Self {
            class_label: d.class.class_label() as i64,
            obb: d.obb.to_flat().to_vec(),
            annotator_reading: d.reading_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Vec<f64> {
        vec![0.1, 0.1, 0.1, 0.9, 0.9, 0.9, 0.9, 0.1]
    }

    #[test]
    fn record_roundtrips_into_canonical_json() {
        let det = Detection::try_from(DetectionRecord {
            class_label: 1,
            obb: unit_box(),
            annotator_reading: Some(12345),
        })
        .unwrap();

        assert_eq!(det.class, UtilityType::HotWater);
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "class_label": 1,
                "obb": [0.1, 0.1, 0.1, 0.9, 0.9, 0.9, 0.9, 0.1],
                "annotator_reading": 12345
            })
        );
    }

    #[test]
    fn missing_reading_serializes_as_null() {
        let det = Detection::try_from(DetectionRecord {
            class_label: 2,
            obb: unit_box(),
            annotator_reading: None,
        })
        .unwrap();
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["annotator_reading"], serde_json::Value::Null);
    }

    #[test]
    fn rejects_unknown_class() {
        let err = Detection::try_from(DetectionRecord {
            class_label: 3,
            obb: unit_box(),
            annotator_reading: None,
        })
        .unwrap_err();
        assert_eq!(err, DetectionError::UnknownClass(3));
    }

    #[test]
    fn rejects_wrong_corner_count() {
        let err = Detection::try_from(DetectionRecord {
            class_label: 0,
            obb: vec![0.1; 6],
            annotator_reading: None,
        })
        .unwrap_err();
        assert_eq!(err, DetectionError::CornerCount(6));
    }

    #[test]
    fn rejects_negative_reading() {
        let err = Detection::try_from(DetectionRecord {
            class_label: 0,
            obb: unit_box(),
            annotator_reading: Some(-4),
        })
        .unwrap_err();
        assert_eq!(err, DetectionError::NegativeReading(-4));
    }

    #[test]
    fn largest_reading_survives_the_wire_unchanged() {
        let obb = OrientedBox::from_flat(&unit_box()).unwrap();
        let det = Detection::new(UtilityType::Electricity, obb, Some(i64::MAX)).unwrap();
        let record = DetectionRecord::from(det.clone());
        assert_eq!(record.annotator_reading, Some(i64::MAX));
        assert_eq!(Detection::try_from(record).unwrap(), det);

        assert_eq!(
            Detection::new(UtilityType::Electricity, obb, Some(-1)).unwrap_err(),
            DetectionError::NegativeReading(-1)
        );
    }

    #[test]
    fn rejects_nan_coordinates() {
        let mut coords = unit_box();
        coords[5] = f64::NAN;
        assert!(matches!(
            OrientedBox::from_flat(&coords),
            Err(DetectionError::CoordinateOutOfRange { index: 2, .. })
        ));
    }

    #[test]
    fn empty_submission_is_valid() {
        assert!(Detection::validate_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn validate_all_reports_the_failing_index() {
        let records = vec![
            DetectionRecord {
                class_label: 0,
                obb: unit_box(),
                annotator_reading: None,
            },
            DetectionRecord {
                class_label: 9,
                obb: unit_box(),
                annotator_reading: None,
            },
        ];
        let err = Detection::validate_all(&records).unwrap_err();
        assert!(err.to_string().contains("detection 1"));
    }

    #[test]
    fn unknown_fields_are_rejected_on_the_wire() {
        let raw = r#"{"class_label":0,"obb":[0,0,0,1,1,1,1,0],"annotator_reading":null,"extra":1}"#;
        assert!(serde_json::from_str::<DetectionRecord>(raw).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn in_range_boxes_are_accepted(coords in proptest::collection::vec(0.0f64..=1.0, 8)) {
                prop_assert!(OrientedBox::from_flat(&coords).is_ok());
            }

            #[test]
            fn any_out_of_range_coordinate_is_rejected(
                coords in proptest::collection::vec(0.0f64..=1.0, 8),
                idx in 0usize..8,
                bad in prop_oneof![1.0001f64..100.0, -100.0f64..-0.0001],
            ) {
                let mut coords = coords;
                coords[idx] = bad;
                let is_out_of_range = matches!(
                    OrientedBox::from_flat(&coords),
                    Err(DetectionError::CoordinateOutOfRange { .. })
                );
                prop_assert!(is_out_of_range);
            }
        }
    }
}
