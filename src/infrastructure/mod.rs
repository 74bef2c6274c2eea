// Core infrastructure modules
pub mod sqlite_database; // SQLite pool, schema and transactions
pub mod viewer;          // Viewer context

pub use sqlite_database::{DatabaseTransaction, SqliteDatabase};
pub use viewer::{CapabilityGuard, CapabilitySet, ViewerContext};
