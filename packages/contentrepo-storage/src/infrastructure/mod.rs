//! Infrastructure layer - Storage adapters
//!
//! - `memory_store`: in-process backend for tests
//! - `sqlite`: durable backend (feature `sqlite`)

pub mod memory_store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory_store::InMemoryVersionStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVersionStore;
