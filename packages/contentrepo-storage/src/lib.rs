//! contentrepo-storage - versioned content repositories
//!
//! A repository owns an ordered sequence of versions. Versions never store
//! their content as a list of rows; membership lives in an append-only
//! ledger of `(content, version_added, version_removed)` facts, and a
//! version's content is every record whose interval covers its number.
//!
//! ## Core Principles
//!
//! 1. **Sealed is immutable**: only an open version accepts content changes
//! 2. **Normalized ledger**: a version never both adds and removes one content
//! 3. **Deletion preserves history**: deleting a version folds its changes
//!    into the next one, so every other version keeps its exact content
//! 4. **Consumers win**: served or published versions are never deleted
//!
//! ## Layout
//!
//! - `domain`: models, storage/cache ports, repository kinds
//! - `versioning`: materializer, mutation engine, squash, retention, lifecycle
//! - `infrastructure`: in-memory and SQLite stores
//! - `api`: async `RepositoryService` and `VersionHandle`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use contentrepo_storage::{ContentUnit, InMemoryVersionStore, RepositoryService, FILE_KIND};
//!
//! let service = RepositoryService::new(InMemoryVersionStore::new());
//! let repo = service.create_repository("files", FILE_KIND).await?;
//!
//! let unit = ContentUnit::new(FILE_KIND).with_natural_key("README.md");
//! service.register_content(&[unit.clone()]).await?;
//!
//! let mut handle = service.new_version(repo.id, None).await?;
//! handle.add_content(&[unit.id].into()).await?;
//! let v1 = handle.finalize().await?.expect("content changed");
//! assert_eq!(v1.number, 1);
//! ```

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod logging;
pub mod versioning;

pub use error::{ErrorKind, Result, StorageError};

pub use api::{RepositoryService, SnapshotMismatch, VerificationReport, VersionHandle};
pub use config::StoreConfig;
pub use domain::{
    CacheInvalidator, ContentCount, ContentId, ContentUnit, CountType, Distribution, DomainId,
    KindRegistry, Publication, Repository, RepositoryContent, RepositoryId, RepositoryKind,
    RepositoryVersion, SimpleKind, VersionId, DEFAULT_DOMAIN, FILE_KIND,
};
pub use infrastructure::InMemoryVersionStore;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteVersionStore;
