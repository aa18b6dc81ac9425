//! Durable home of finalized annotations.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAnnotationRepository;
pub use postgres::PostgresAnnotationRepository;
pub use r#trait::{AnnotationRepository, RepositoryError};
