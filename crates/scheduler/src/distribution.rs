//! Target and observed class distributions.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use meterlab_core::UtilityType;

/// Tolerance for "sums to 1".
const SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistributionError {
    #[error("fraction for {0} must be within [0, 1], got {1}")]
    OutOfRange(UtilityType, f64),

    #[error("target fractions must sum to 1, got {0}")]
    BadSum(f64),

    #[error("malformed target entry '{0}' (expected type=fraction)")]
    Malformed(String),

    #[error("{0} listed more than once")]
    Repeated(UtilityType),
}

/// Desired long-run share of finalized annotations per utility type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "ShareMap")]
pub struct TargetDistribution {
    shares: [f64; 3],
}

impl TargetDistribution {
    /// Build from `(type, share)` pairs. Unlisted types get share 0.
    pub fn new(entries: &[(UtilityType, f64)]) -> Result<Self, DistributionError> {
        let mut shares = [0.0; 3];
        let mut seen = [false; 3];
        for &(t, share) in entries {
            if !(0.0..=1.0).contains(&share) {
                return Err(DistributionError::OutOfRange(t, share));
            }
            if seen[t.index()] {
                return Err(DistributionError::Repeated(t));
            }
            seen[t.index()] = true;
            shares[t.index()] = share;
        }
        let sum: f64 = shares.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(DistributionError::BadSum(sum));
        }
        Ok(Self { shares })
    }

    pub fn share(&self, t: UtilityType) -> f64 {
        self.shares[t.index()]
    }

    pub fn shares(&self) -> [f64; 3] {
        self.shares
    }
}

impl Default for TargetDistribution {
    /// 70% water split into cold/hot, 30% electricity.
    fn default() -> Self {
        Self {
            shares: [0.6, 0.1, 0.3],
        }
    }
}

impl FromStr for TargetDistribution {
    type Err = DistributionError;

    /// Parse `cold_water=0.6,hot_water=0.1,electricity=0.3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| DistributionError::Malformed(part.to_string()))?;
            let t = UtilityType::from_str(name)
                .map_err(|_| DistributionError::Malformed(part.to_string()))?;
            let share = value
                .trim()
                .parse::<f64>()
                .map_err(|_| DistributionError::Malformed(part.to_string()))?;
            entries.push((t, share));
        }
        Self::new(&entries)
    }
}

/// Finalized annotation tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub cold_water: u64,
    pub hot_water: u64,
    pub electricity: u64,
    /// Annotations confirmed to contain no meter.
    pub no_meter: u64,
    /// Annotation rows (images), regardless of content.
    pub total_images: u64,
}

impl ClassCounts {
    pub fn get(&self, t: UtilityType) -> u64 {
        match t {
            UtilityType::ColdWater => self.cold_water,
            UtilityType::HotWater => self.hot_water,
            UtilityType::Electricity => self.electricity,
        }
    }

    pub fn add(&mut self, t: UtilityType, n: u64) {
        match t {
            UtilityType::ColdWater => self.cold_water += n,
            UtilityType::HotWater => self.hot_water += n,
            UtilityType::Electricity => self.electricity += n,
        }
    }

    /// Sum of typed counts (the denominator of the fractions).
    pub fn typed_total(&self) -> u64 {
        self.cold_water + self.hot_water + self.electricity
    }

    /// Current proportions, or `None` in the initial state (nothing typed yet).
    pub fn fractions(&self) -> Option<Fractions> {
        let total = self.typed_total();
        if total == 0 {
            return None;
        }
        let total = total as f64;
        Some(Fractions {
            values: [
                self.cold_water as f64 / total,
                self.hot_water as f64 / total,
                self.electricity as f64 / total,
            ],
        })
    }
}

/// Observed proportion per utility type; always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "ShareMap")]
pub struct Fractions {
    values: [f64; 3],
}

impl Fractions {
    pub fn get(&self, t: UtilityType) -> f64 {
        self.values[t.index()]
    }

    pub fn values(&self) -> [f64; 3] {
        self.values
    }
}

/// Wire form of a per-type share vector.
#[derive(Serialize)]
struct ShareMap {
    cold_water: f64,
    hot_water: f64,
    electricity: f64,
}

impl From<[f64; 3]> for ShareMap {
    fn from([cold_water, hot_water, electricity]: [f64; 3]) -> Self {
        Self {
            cold_water,
            hot_water,
            electricity,
        }
    }
}

impl From<TargetDistribution> for ShareMap {
    fn from(t: TargetDistribution) -> Self {
        t.shares.into()
    }
}

impl From<Fractions> for ShareMap {
    fn from(f: Fractions) -> Self {
        f.values.into()
    }
}
