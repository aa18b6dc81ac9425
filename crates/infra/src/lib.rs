//! Durable-store boundary and the assignment cycle.
//!
//! Stores sit behind synchronous traits with in-memory and SQL implementations.
//! Everything above them ([`AssignmentOrchestrator`], [`AnnotationStore`]) is
//! generic over those traits and never caches store state in-process.

pub mod annotations;
pub mod config;
pub mod fetcher;
pub mod lease;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod store;
pub mod sweeper;
pub mod tracker;

pub use annotations::{AnnotationRepository, InMemoryAnnotationRepository, RepositoryError};
pub use config::{AppConfig, ConfigError};
pub use fetcher::{CandidateFetcher, FetchError};
pub use lease::{InMemoryLeaseLedger, LeaseError, LeaseLedger};
pub use orchestrator::{AssignError, Assignment, AssignmentOrchestrator, AssignmentSettings};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use source::{InMemorySourceClient, SourceClient, SourceDirectory, SourceError, SourceReading};
pub use store::{AnnotationStore, SubmitError};
pub use sweeper::{LeaseSweeper, LeaseSweeperHandle};
pub use tracker::DistributionTracker;
