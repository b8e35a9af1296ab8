//! blockindex-storage — persistent storage backends for BlockIndex.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! The in-memory store lives in `blockindex-core` as
//! [`MemoryStore`](blockindex_core::store::MemoryStore).

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
