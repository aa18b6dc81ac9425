//! Utility (meter) classes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The class assigned to a detected meter.
///
/// The integer class label (`0`, `1`, `2`) is part of the persisted detection
/// format and must never be renumbered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilityType {
    ColdWater,
    HotWater,
    Electricity,
}

impl UtilityType {
    /// All classes in class-label order.
    pub const ALL: [UtilityType; 3] = [
        UtilityType::ColdWater,
        UtilityType::HotWater,
        UtilityType::Electricity,
    ];

    pub const fn class_label(self) -> u8 {
        match self {
            UtilityType::ColdWater => 0,
            UtilityType::HotWater => 1,
            UtilityType::Electricity => 2,
        }
    }

    pub fn from_class_label(label: i64) -> Option<Self> {
        match label {
            0 => Some(UtilityType::ColdWater),
            1 => Some(UtilityType::HotWater),
            2 => Some(UtilityType::Electricity),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            UtilityType::ColdWater => "cold_water",
            UtilityType::HotWater => "hot_water",
            UtilityType::Electricity => "electricity",
        }
    }

    /// Position in [`UtilityType::ALL`], handy for fixed-size per-class arrays.
    pub const fn index(self) -> usize {
        self.class_label() as usize
    }
}

impl core::fmt::Display for UtilityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UtilityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cold_water" => Ok(UtilityType::ColdWater),
            "hot_water" => Ok(UtilityType::HotWater),
            "electricity" => Ok(UtilityType::Electricity),
            other => Err(DomainError::validation(format!(
                "unknown utility type '{other}' (expected cold_water, hot_water or electricity)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_labels_are_stable() {
        assert_eq!(UtilityType::ColdWater.class_label(), 0);
        assert_eq!(UtilityType::HotWater.class_label(), 1);
        assert_eq!(UtilityType::Electricity.class_label(), 2);

        for t in UtilityType::ALL {
            assert_eq!(UtilityType::from_class_label(t.class_label() as i64), Some(t));
        }
        assert_eq!(UtilityType::from_class_label(3), None);
        assert_eq!(UtilityType::from_class_label(-1), None);
    }

    #[test]
    fn parses_snake_case_names() {
        assert_eq!("hot_water".parse::<UtilityType>().unwrap(), UtilityType::HotWater);
        assert_eq!(" Electricity ".parse::<UtilityType>().unwrap(), UtilityType::Electricity);
        assert!("water".parse::<UtilityType>().is_err());
    }
}
