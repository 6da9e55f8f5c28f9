//! Versioning core
//!
//! Synchronous algorithms over a single [`LedgerTx`](crate::domain::LedgerTx):
//!
//! - `materializer`: version membership, snapshots, diffs
//! - `mutation`: add/remove/set content on an open version
//! - `squash`: fold a deleted version into its successor
//! - `counts`: per content-type summaries
//! - `retention`: protection rules and retention sweeps
//! - `lifecycle`: open, seal, discard, delete

pub mod counts;
pub mod lifecycle;
pub mod materializer;
pub mod mutation;
pub mod retention;
pub mod squash;

pub use lifecycle::{
    create_initial_version, delete_version, discard_version, open_version, seal_version, Finalized,
};
pub use mutation::VersionEditor;
pub use retention::{cleanup_old_versions, protected_versions, retention_candidates};
