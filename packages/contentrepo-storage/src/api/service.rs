//! RepositoryService - high-level API
//!
//! Wraps a [`VersionStore`] with repository and version operations. Every
//! operation runs its storage work in one short transaction that never spans
//! an `.await`; cache invalidation happens after the commit.
//!
//! # Version lifecycle
//!
//! ```rust,ignore
//! let service = RepositoryService::new(InMemoryVersionStore::new());
//! let repo = service.create_repository("files", FILE_KIND).await?;
//!
//! let mut handle = service.new_version(repo.id, None).await?;
//! handle.add_content(&ids).await?;
//! let sealed = handle.finalize().await?; // None when nothing changed
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::handle::VersionHandle;
use crate::config::{StoreConfig, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use crate::domain::{
    CacheInvalidator, ContentCount, ContentId, ContentUnit, Distribution, DomainId, KindRegistry,
    LedgerTx, MembershipFilter, NoopInvalidator, Publication, Repository, RepositoryContent,
    RepositoryId, RepositoryVersion, VersionId, VersionStore, DEFAULT_DOMAIN,
};
use crate::infrastructure::InMemoryVersionStore;
use crate::versioning::{self, materializer, retention};
use crate::{Result, StorageError};

/// A version whose cached snapshot disagrees with the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMismatch {
    pub number: u32,
    /// In the ledger but not in the snapshot
    pub missing_from_snapshot: BTreeSet<ContentId>,
    /// In the snapshot but not in the ledger
    pub missing_from_ledger: BTreeSet<ContentId>,
}

/// Result of [`RepositoryService::verify_repository`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub versions_checked: usize,
    pub mismatches: Vec<SnapshotMismatch>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub(crate) struct ServiceInner {
    pub(crate) store: Arc<dyn VersionStore>,
    pub(crate) kinds: KindRegistry,
    pub(crate) invalidator: Arc<dyn CacheInvalidator>,
    pub(crate) batch_size: usize,
    pub(crate) cache_enabled: bool,
    /// Repositories with a live [`VersionHandle`] in this process
    pub(crate) live: Mutex<HashSet<RepositoryId>>,
}

impl ServiceInner {
    pub(crate) fn read<T>(&self, f: impl FnOnce(&mut dyn LedgerTx) -> Result<T>) -> Result<T> {
        let mut tx = self.store.begin()?;
        f(tx.as_mut())
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut dyn LedgerTx) -> Result<T>) -> Result<T> {
        let mut tx = self.store.begin()?;
        let out = f(tx.as_mut())?;
        tx.commit()?;
        Ok(out)
    }

    pub(crate) async fn invalidate(&self, base_paths: Vec<String>) {
        if !self.cache_enabled || base_paths.is_empty() {
            return;
        }
        debug!(paths = ?base_paths, "Invalidating content cache");
        self.invalidator.invalidate(&base_paths).await;
    }

    /// Base paths of distributions pointing at the repository itself
    pub(crate) fn repository_base_paths(
        tx: &mut dyn LedgerTx,
        repository_id: RepositoryId,
    ) -> Result<Vec<String>> {
        Ok(tx
            .distributions(repository_id)?
            .into_iter()
            .filter(|d| d.repository_id == Some(repository_id))
            .map(|d| d.base_path)
            .collect())
    }

    pub(crate) fn cleanup(&self, repository_id: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        retention::cleanup_old_versions(self.store.as_ref(), repository_id, self.batch_size)
    }
}

fn load_repository(tx: &mut dyn LedgerTx, id: RepositoryId) -> Result<Repository> {
    tx.get_repository(id)?
        .ok_or_else(|| StorageError::repository_not_found(id))
}

fn load_version(tx: &mut dyn LedgerTx, id: RepositoryId, number: u32) -> Result<RepositoryVersion> {
    tx.version_by_number(id, number)?
        .ok_or_else(|| StorageError::version_not_found(format!("{}@{}", id, number)))
}

#[cfg(feature = "sqlite")]
fn open_store(config: &StoreConfig) -> Result<Arc<dyn VersionStore>> {
    use crate::infrastructure::SqliteVersionStore;
    use std::time::Duration;

    match &config.database.path {
        Some(path) => {
            let store = SqliteVersionStore::new(path)?;
            store.set_busy_timeout(Duration::from_millis(config.database.busy_timeout_ms))?;
            info!(path = %path.display(), "Opened SQLite version store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryVersionStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_store(config: &StoreConfig) -> Result<Arc<dyn VersionStore>> {
    match &config.database.path {
        Some(_) => Err(StorageError::config(
            "database.path requires the `sqlite` feature",
        )),
        None => Ok(Arc::new(InMemoryVersionStore::new())),
    }
}

/// High-level repository API
#[derive(Clone)]
pub struct RepositoryService {
    pub(crate) inner: Arc<ServiceInner>,
}

impl RepositoryService {
    /// Create a service over `store` with the built-in kinds and no cache
    pub fn new<S: VersionStore + 'static>(store: S) -> Self {
        Self::from_store(Arc::new(store))
    }

    pub fn from_store(store: Arc<dyn VersionStore>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                store,
                kinds: KindRegistry::default(),
                invalidator: Arc::new(NoopInvalidator),
                batch_size: DEFAULT_BATCH_SIZE,
                cache_enabled: false,
                live: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Open the configured store and apply the configuration
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let service = Self::from_store(open_store(config)?)
            .with_kinds(config.kind_registry())
            .with_batch_size(config.batch_size);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                cache_enabled: config.cache_enabled,
                ..service.into_inner()
            }),
        })
    }

    fn into_inner(self) -> ServiceInner {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => ServiceInner {
                store: shared.store.clone(),
                kinds: shared.kinds.clone(),
                invalidator: shared.invalidator.clone(),
                batch_size: shared.batch_size,
                cache_enabled: shared.cache_enabled,
                live: Mutex::new(shared.live.lock().clone()),
            },
        }
    }

    pub fn with_kinds(self, kinds: KindRegistry) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                kinds,
                ..self.into_inner()
            }),
        }
    }

    /// Set the IN-list batch size, clamped to `1..=MAX_BATCH_SIZE`
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
                ..self.into_inner()
            }),
        }
    }

    /// Enable cache invalidation through `invalidator`
    pub fn with_cache(self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                invalidator,
                cache_enabled: true,
                ..self.into_inner()
            }),
        }
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.inner.kinds
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Repositories
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a repository in the default domain with an empty version 0
    pub async fn create_repository(&self, name: &str, kind: &str) -> Result<Repository> {
        self.create_repository_with(Repository::in_domain(name, kind, DEFAULT_DOMAIN))
            .await
    }

    /// Create a repository from a prepared entity (domain, description, retention...)
    pub async fn create_repository_with(&self, mut repository: Repository) -> Result<Repository> {
        self.inner.kinds.get(&repository.kind)?;
        if repository.retain_repo_versions == Some(0) {
            return Err(StorageError::config("retain_repo_versions must be at least 1")
                .with_repository(repository.id));
        }

        repository.next_version = 0;
        self.inner.write(|tx| {
            tx.insert_repository(&repository)?;
            versioning::create_initial_version(tx, &mut repository)?;
            Ok(())
        })?;

        info!(repository = %repository, kind = %repository.kind, "Created repository");
        Ok(repository)
    }

    pub async fn get_repository(&self, id: RepositoryId) -> Result<Repository> {
        self.inner.read(|tx| load_repository(tx, id))
    }

    pub async fn repository_by_name(&self, name: &str, domain_id: DomainId) -> Result<Repository> {
        self.inner.read(|tx| {
            tx.repository_by_name(name, domain_id)?
                .ok_or_else(|| StorageError::repository_not_found(name))
        })
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.inner.read(|tx| tx.list_repositories())
    }

    /// Delete the repository with all of its versions, ledger and publications
    pub async fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        let (repository, base_paths) = {
            let live = self.inner.live.lock();
            if live.contains(&id) {
                return Err(StorageError::concurrent_mutation(
                    id,
                    "A version of the repository is being built",
                ));
            }

            self.inner.write(|tx| {
                let repository = load_repository(tx, id)?;
                let base_paths: Vec<String> = tx
                    .distributions(id)?
                    .into_iter()
                    .map(|d| d.base_path)
                    .collect();
                tx.delete_repository(id)?;
                Ok((repository, base_paths))
            })?
        };

        self.inner.invalidate(base_paths).await;
        info!(repository = %repository, "Deleted repository");
        Ok(())
    }

    /// Change the retention limit; a finite limit is applied right away
    pub async fn set_retention(
        &self,
        id: RepositoryId,
        retain_repo_versions: Option<u32>,
    ) -> Result<Vec<RepositoryVersion>> {
        if retain_repo_versions == Some(0) {
            return Err(
                StorageError::config("retain_repo_versions must be at least 1").with_repository(id),
            );
        }

        let changed = self.inner.write(|tx| {
            let mut repository = load_repository(tx, id)?;
            if repository.retain_repo_versions == retain_repo_versions {
                return Ok(false);
            }
            repository.retain_repo_versions = retain_repo_versions;
            tx.update_repository(&repository)?;
            Ok(true)
        })?;

        if changed && retain_repo_versions.is_some() {
            return self.inner.cleanup(id);
        }
        Ok(Vec::new())
    }

    /// Apply the retention limit now
    pub async fn cleanup_old_versions(&self, id: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        self.inner.cleanup(id)
    }

    /// Compare every version's snapshot with the set derived from the ledger
    pub async fn verify_repository(&self, id: RepositoryId) -> Result<VerificationReport> {
        self.inner.read(|tx| {
            load_repository(tx, id)?;
            let mut report = VerificationReport::default();
            for version in tx.list_versions(id)? {
                report.versions_checked += 1;
                let Some(snapshot) = &version.content_ids else {
                    continue;
                };
                let derived = materializer::derive_from_ledger(tx, &version)?;
                if &derived != snapshot {
                    report.mismatches.push(SnapshotMismatch {
                        number: version.number,
                        missing_from_snapshot: derived.difference(snapshot).copied().collect(),
                        missing_from_ledger: snapshot.difference(&derived).copied().collect(),
                    });
                }
            }
            Ok(report)
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Content catalog
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Register content units; already registered units are kept as they are
    pub async fn register_content(&self, units: &[ContentUnit]) -> Result<()> {
        let batch_size = self.inner.batch_size;
        self.inner.write(|tx| {
            for batch in materializer::batches(units, batch_size) {
                tx.insert_content(batch)?;
            }
            Ok(())
        })?;
        debug!(count = units.len(), "Registered content");
        Ok(())
    }

    pub async fn content_units(&self, ids: &BTreeSet<ContentId>) -> Result<Vec<ContentUnit>> {
        let batch_size = self.inner.batch_size;
        self.inner
            .read(|tx| materializer::content_units(tx, ids, batch_size))
    }

    /// Every version, in any repository, containing at least one of `ids`
    pub async fn versions_with_content(
        &self,
        ids: &BTreeSet<ContentId>,
    ) -> Result<Vec<RepositoryVersion>> {
        let batch_size = self.inner.batch_size;
        self.inner
            .read(|tx| materializer::versions_with_content(tx, ids, batch_size))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Versions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Open the next version of the repository.
    ///
    /// The version starts with the latest complete version's content, or
    /// with version `base`'s content when given.
    pub async fn new_version(
        &self,
        repository_id: RepositoryId,
        base: Option<u32>,
    ) -> Result<VersionHandle> {
        let batch_size = self.inner.batch_size;
        let (repository, version, base_paths) = {
            let mut live = self.inner.live.lock();
            let held = live.contains(&repository_id);

            let opened = self.inner.write(|tx| {
                let repository = load_repository(tx, repository_id)?;
                let kind = self.inner.kinds.get(&repository.kind)?;
                let base = match base {
                    Some(number) => Some(load_version(tx, repository_id, number)?),
                    None => None,
                };
                let version = versioning::open_version(
                    tx,
                    &repository,
                    kind.as_ref(),
                    base.as_ref(),
                    held,
                    batch_size,
                )?;
                let base_paths = ServiceInner::repository_base_paths(tx, repository_id)?;
                Ok((repository, version, base_paths))
            })?;

            live.insert(repository_id);
            opened
        };

        self.inner.invalidate(base_paths).await;
        info!(version = %version, "Opened new version");
        Ok(VersionHandle::new(self.clone(), repository, version))
    }

    pub async fn get_version(&self, repository_id: RepositoryId, number: u32) -> Result<RepositoryVersion> {
        self.inner.read(|tx| load_version(tx, repository_id, number))
    }

    pub async fn get_version_by_id(&self, id: VersionId) -> Result<RepositoryVersion> {
        self.inner.read(|tx| {
            tx.get_version(id)?
                .ok_or_else(|| StorageError::version_not_found(id))
        })
    }

    /// Latest complete version
    pub async fn latest_version(&self, repository_id: RepositoryId) -> Result<RepositoryVersion> {
        self.inner.read(|tx| {
            load_repository(tx, repository_id)?;
            materializer::latest_complete(tx, repository_id)?
                .ok_or_else(|| StorageError::version_not_found(format!("{}@latest", repository_id)))
        })
    }

    /// All versions of the repository, open ones included, by number
    pub async fn list_versions(&self, repository_id: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        self.inner.read(|tx| {
            load_repository(tx, repository_id)?;
            tx.list_versions(repository_id)
        })
    }

    /// Delete a version, folding its changes into its successor
    pub async fn delete_version(&self, repository_id: RepositoryId, number: u32) -> Result<()> {
        let batch_size = self.inner.batch_size;
        let (version, base_paths) = {
            let live = self.inner.live.lock();
            let held = live.contains(&repository_id);

            self.inner.write(|tx| {
                let version = load_version(tx, repository_id, number)?;
                if !version.complete && held {
                    return Err(StorageError::concurrent_mutation(
                        repository_id,
                        format!("Version {} is still being built", number),
                    ));
                }
                let base_paths: Vec<String> = tx
                    .distributions(repository_id)?
                    .into_iter()
                    .filter(|d| d.repository_version_id == Some(version.id))
                    .map(|d| d.base_path)
                    .collect();
                versioning::delete_version(tx, &version, batch_size)?;
                Ok((version, base_paths))
            })?
        };

        self.inner.invalidate(base_paths).await;
        info!(version = %version, "Deleted version");
        Ok(())
    }

    pub async fn content(&self, repository_id: RepositoryId, number: u32) -> Result<BTreeSet<ContentId>> {
        self.inner.read(|tx| {
            let version = load_version(tx, repository_id, number)?;
            materializer::content_ids(tx, &version)
        })
    }

    /// The version's content units in id order, at most `batch_size` per batch
    pub async fn content_batches(
        &self,
        repository_id: RepositoryId,
        number: u32,
    ) -> Result<Vec<Vec<ContentUnit>>> {
        let batch_size = self.inner.batch_size;
        self.inner.read(|tx| {
            let version = load_version(tx, repository_id, number)?;
            materializer::content_batches(tx, &version, batch_size)
        })
    }

    pub async fn contains(
        &self,
        repository_id: RepositoryId,
        number: u32,
        content_id: ContentId,
    ) -> Result<bool> {
        self.inner.read(|tx| {
            let version = load_version(tx, repository_id, number)?;
            materializer::contains(tx, &version, content_id)
        })
    }

    /// Content added by the version, or relative to version `base` when given
    pub async fn added(
        &self,
        repository_id: RepositoryId,
        number: u32,
        base: Option<u32>,
    ) -> Result<BTreeSet<ContentId>> {
        self.inner.read(|tx| {
            let version = load_version(tx, repository_id, number)?;
            let base = match base {
                Some(b) => Some(load_version(tx, repository_id, b)?),
                None => None,
            };
            materializer::added(tx, &version, base.as_ref())
        })
    }

    /// Content removed by the version, or relative to version `base` when given
    pub async fn removed(
        &self,
        repository_id: RepositoryId,
        number: u32,
        base: Option<u32>,
    ) -> Result<BTreeSet<ContentId>> {
        self.inner.read(|tx| {
            let version = load_version(tx, repository_id, number)?;
            let base = match base {
                Some(b) => Some(load_version(tx, repository_id, b)?),
                None => None,
            };
            materializer::removed(tx, &version, base.as_ref())
        })
    }

    pub async fn counts(&self, repository_id: RepositoryId, number: u32) -> Result<Vec<ContentCount>> {
        self.inner.read(|tx| {
            let version = load_version(tx, repository_id, number)?;
            tx.counts(version.id)
        })
    }

    /// Raw ledger records of the repository
    pub async fn ledger(&self, repository_id: RepositoryId) -> Result<Vec<RepositoryContent>> {
        self.inner.read(|tx| {
            load_repository(tx, repository_id)?;
            tx.memberships(repository_id, &MembershipFilter::default())
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Publications & distributions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Versions retention and deletion must leave alone, by number
    pub async fn protected_versions(&self, repository_id: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        self.inner.read(|tx| {
            let protected = retention::protected_versions(tx, repository_id)?;
            Ok(tx
                .list_versions(repository_id)?
                .into_iter()
                .filter(|v| protected.contains(&v.id))
                .collect())
        })
    }

    /// Record a publication built from a complete version
    pub async fn create_publication(
        &self,
        repository_id: RepositoryId,
        number: u32,
        checkpoint: bool,
    ) -> Result<Publication> {
        self.inner.write(|tx| {
            let version = load_version(tx, repository_id, number)?;
            if !version.complete {
                return Err(StorageError::version_not_found(format!(
                    "{} (incomplete)",
                    version
                )));
            }
            let mut publication = Publication::new(version.id);
            publication.checkpoint = checkpoint;
            tx.insert_publication(&publication)?;
            Ok(publication)
        })
    }

    pub async fn create_distribution(&self, distribution: Distribution) -> Result<Distribution> {
        self.inner.write(|tx| {
            tx.insert_distribution(&distribution)?;
            Ok(())
        })?;
        debug!(name = %distribution.name, base_path = %distribution.base_path, "Created distribution");
        Ok(distribution)
    }

    pub async fn delete_distribution(&self, id: Uuid) -> Result<()> {
        self.inner.write(|tx| tx.delete_distribution(id))
    }
}
