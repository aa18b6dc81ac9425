//! Read-only access to the external per-client reading stores.

pub mod in_memory;
pub mod mysql;
pub mod r#trait;

pub use in_memory::InMemorySourceClient;
pub use mysql::{MySqlSourceClient, SourceDbSettings};
pub use r#trait::{SourceClient, SourceDirectory, SourceError, SourceReading};
