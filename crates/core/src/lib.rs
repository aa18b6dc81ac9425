//! `meterlab-core`: domain foundation for meter-image labelling.
//!
//! This crate contains **pure domain** types (no storage, no transport). The
//! durable stores and the assignment cycle live in `meterlab-infra`.

pub mod annotation;
pub mod candidate;
pub mod clock;
pub mod detection;
pub mod error;
pub mod id;
pub mod lease;
pub mod registry;
pub mod utility;

pub use annotation::{Annotation, NewAnnotation};
pub use candidate::{Candidate, ReadingHint};
pub use clock::{Clock, ManualClock, SystemClock};
pub use detection::{Detection, DetectionError, DetectionRecord, OrientedBox, Point};
pub use error::{DomainError, DomainResult};
pub use id::{AnnotationId, ClientId, ReadingId, SessionId};
pub use lease::{Lease, LeaseKey, LeaseToken};
pub use registry::{ClientDescriptor, Environment, SourceRegistry};
pub use utility::UtilityType;
