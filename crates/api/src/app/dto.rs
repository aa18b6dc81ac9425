use serde::{Deserialize, Serialize};

use meterlab_core::{Annotation, DetectionRecord, Environment, LeaseToken};
use meterlab_scheduler::{ClassCounts, Fractions, TargetDistribution};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignmentRequest {
    /// Defaults to the environment the server runs in.
    #[serde(default)]
    pub environment: Option<Environment>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseRequest {
    pub lease_token: LeaseToken,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    pub lease_token: LeaseToken,
    /// Empty means "no meter present".
    pub detections: Vec<DetectionRecord>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub annotation: Annotation,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub counts: ClassCounts,
    /// `null` until the first typed detection exists.
    pub fractions: Option<Fractions>,
    pub target: TargetDistribution,
}
