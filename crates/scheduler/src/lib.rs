//! `meterlab-scheduler`: class-mix steering and client choice.
//!
//! Pure and storage agnostic: callers supply current counts and a random
//! source, this crate decides what to draw next.

pub mod balancer;
pub mod distribution;
pub mod selector;

pub use balancer::{Balancer, DEFAULT_EPSILON};
pub use distribution::{ClassCounts, DistributionError, Fractions, TargetDistribution};
pub use selector::ClientSelector;
