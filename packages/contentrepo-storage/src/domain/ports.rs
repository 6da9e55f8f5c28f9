//! Storage and cache ports
//!
//! Port/Adapter pattern for backend flexibility:
//! - Testing: InMemory (fast unit tests)
//! - Production: SQLite (durable, transactional)
//!
//! Every read and write goes through a `LedgerTx`. A transaction is exclusive
//! for its whole lifetime, commits only through [`LedgerTx::commit`], and rolls
//! back when dropped uncommitted.

use async_trait::async_trait;
use uuid::Uuid;

use super::models::{
    ContentCount, ContentId, ContentUnit, Distribution, DomainId, MembershipFilter, MembershipId,
    Publication, Repository, RepositoryContent, RepositoryId, RepositoryVersion, VersionId,
};
use crate::Result;

/// Transactional store (primary port)
pub trait VersionStore: Send + Sync {
    /// Open an exclusive transaction.
    fn begin(&self) -> Result<Box<dyn LedgerTx + '_>>;
}

/// One exclusive, atomic unit of work against the store
pub trait LedgerTx {
    /// Make every change of this transaction visible.
    fn commit(self: Box<Self>) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Repositories
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_repository(&mut self, repo: &Repository) -> Result<()>;

    fn get_repository(&mut self, id: RepositoryId) -> Result<Option<Repository>>;

    fn repository_by_name(&mut self, name: &str, domain_id: DomainId)
        -> Result<Option<Repository>>;

    fn list_repositories(&mut self) -> Result<Vec<Repository>>;

    fn update_repository(&mut self, repo: &Repository) -> Result<()>;

    /// Delete the repository with its versions, ledger, counts and
    /// publications. Distributions pointing at any of them are detached.
    fn delete_repository(&mut self, id: RepositoryId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Versions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_version(&mut self, version: &RepositoryVersion) -> Result<()>;

    fn get_version(&mut self, id: VersionId) -> Result<Option<RepositoryVersion>>;

    fn version_by_number(
        &mut self,
        repository_id: RepositoryId,
        number: u32,
    ) -> Result<Option<RepositoryVersion>>;

    /// All versions of a repository ordered by number
    fn list_versions(&mut self, repository_id: RepositoryId) -> Result<Vec<RepositoryVersion>>;

    /// Persist `complete`, `base_version_id`, `content_ids` and `info`.
    fn update_version(&mut self, version: &RepositoryVersion) -> Result<()>;

    /// Delete a version row with its counts and publications. Ledger records
    /// must already be detached. `base_version_id` references to it become
    /// `None` and distributions serving it or its publications are detached.
    fn delete_version(&mut self, id: VersionId) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Content catalog
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert content units; units already registered are left untouched.
    fn insert_content(&mut self, units: &[ContentUnit]) -> Result<()>;

    /// Look up content units by id (callers batch `ids`)
    fn content_units(&mut self, ids: &[ContentId]) -> Result<Vec<ContentUnit>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Ledger
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append open records `(content, version_added)` for each id.
    fn insert_memberships(
        &mut self,
        repository_id: RepositoryId,
        version_added: VersionId,
        content_ids: &[ContentId],
    ) -> Result<()>;

    fn memberships(
        &mut self,
        repository_id: RepositoryId,
        filter: &MembershipFilter<'_>,
    ) -> Result<Vec<RepositoryContent>>;

    /// Records of any repository touching the given content (callers batch `ids`)
    fn memberships_for_content(&mut self, ids: &[ContentId]) -> Result<Vec<RepositoryContent>>;

    fn delete_memberships(&mut self, ids: &[MembershipId]) -> Result<()>;

    fn set_version_added(&mut self, ids: &[MembershipId], version_id: VersionId) -> Result<()>;

    fn set_version_removed(
        &mut self,
        ids: &[MembershipId],
        version_id: Option<VersionId>,
    ) -> Result<()>;

    /// Number of records naming the version as adder or remover
    fn count_references(&mut self, version_id: VersionId) -> Result<u64>;

    /// Content present at `number` according to the ledger alone
    fn content_at(&mut self, repository_id: RepositoryId, number: u32) -> Result<Vec<ContentId>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Count summaries
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Replace all counts of a version
    fn replace_counts(&mut self, version_id: VersionId, counts: &[ContentCount]) -> Result<()>;

    fn counts(&mut self, version_id: VersionId) -> Result<Vec<ContentCount>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Publications & distributions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_publication(&mut self, publication: &Publication) -> Result<()>;

    /// Publications built from any version of the repository
    fn publications(&mut self, repository_id: RepositoryId) -> Result<Vec<Publication>>;

    fn insert_distribution(&mut self, distribution: &Distribution) -> Result<()>;

    fn delete_distribution(&mut self, id: Uuid) -> Result<()>;

    /// Distributions that point at the repository, one of its versions, or a
    /// publication of one of its versions
    fn distributions(&mut self, repository_id: RepositoryId) -> Result<Vec<Distribution>>;
}

/// Content cache port
///
/// Invoked after structural changes of a repository's served surface. The
/// core does not wait on the outcome; implementations log their own failures.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, base_paths: &[String]);
}

/// Invalidator used when caching is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, _base_paths: &[String]) {}
}
