//! Async API
//!
//! - `RepositoryService`: repositories, versions, content queries, consumers
//! - `VersionHandle`: one open version, finalized or discarded exactly once

pub mod handle;
pub mod service;

pub use handle::VersionHandle;
pub use service::{RepositoryService, SnapshotMismatch, VerificationReport};
