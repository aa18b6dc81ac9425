//! Claims on candidates.
//!
//! At most one unexpired lease exists per `(source_client, source_reading_id)`.
//! Expiry is passive: an expired lease is treated as absent by every read and
//! by the next `acquire`, whether or not it has been purged yet.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLeaseLedger;
pub use postgres::PostgresLeaseLedger;
pub use r#trait::{LeaseError, LeaseLedger};
