//! In-Memory Version Store (for testing)
//!
//! `HashMap`-based backend. A transaction holds the state mutex for its whole
//! lifetime and works on a copy that replaces the shared state on commit, so
//! a dropped transaction leaves nothing behind.
//!
//! Mirrors the SQLite unique constraints; NOT for production use.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    ContentCount, ContentId, ContentUnit, Distribution, DomainId, LedgerTx, MembershipFilter,
    MembershipId, Publication, Repository, RepositoryContent, RepositoryId, RepositoryVersion,
    VersionId, VersionStore,
};
use crate::{Result, StorageError};

#[derive(Debug, Clone, Default)]
struct State {
    repositories: HashMap<RepositoryId, Repository>,
    versions: HashMap<VersionId, RepositoryVersion>,
    content: HashMap<ContentId, ContentUnit>,
    ledger: BTreeMap<MembershipId, RepositoryContent>,
    next_membership_id: MembershipId,
    counts: HashMap<VersionId, Vec<ContentCount>>,
    publications: HashMap<Uuid, Publication>,
    distributions: HashMap<Uuid, Distribution>,
}

impl State {
    fn version_number(&self, id: VersionId) -> Option<u32> {
        self.versions.get(&id).map(|v| v.number)
    }

    fn version_ids_of(&self, repository_id: RepositoryId) -> BTreeSet<VersionId> {
        self.versions
            .values()
            .filter(|v| v.repository_id == repository_id)
            .map(|v| v.id)
            .collect()
    }

    /// Fails when `changed` records, written over the ledger, would share a
    /// (repository, content, version_added) or (repository, content,
    /// version_removed) key with another record.
    fn check_ledger_keys(&self, changed: &[RepositoryContent]) -> Result<()> {
        let replaced: BTreeSet<MembershipId> = changed.iter().map(|r| r.id).collect();
        let mut added = BTreeSet::new();
        let mut removed = BTreeSet::new();
        let untouched = self.ledger.values().filter(|r| !replaced.contains(&r.id));
        for record in untouched.chain(changed) {
            let key = (record.repository_id, record.content_id);
            let unique_removal = match record.version_removed {
                Some(version) => removed.insert((key, version)),
                None => true,
            };
            if !added.insert((key, record.version_added)) || !unique_removal {
                return Err(StorageError::duplicate_membership(
                    record.repository_id,
                    record.content_id,
                ));
            }
        }
        Ok(())
    }

    fn publication_ids_of(&self, versions: &BTreeSet<VersionId>) -> BTreeSet<Uuid> {
        self.publications
            .values()
            .filter(|p| versions.contains(&p.repository_version_id))
            .map(|p| p.id)
            .collect()
    }
}

/// In-memory [`VersionStore`]
#[derive(Default)]
pub struct InMemoryVersionStore {
    state: Mutex<State>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn begin(&self) -> Result<Box<dyn LedgerTx + '_>> {
        let guard = self.state.lock();
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx<'s> {
    guard: MutexGuard<'s, State>,
    working: State,
}

impl MemoryTx<'_> {
    /// Apply `change` to the records `ids` as one statement: all or nothing.
    fn update_records(
        &mut self,
        ids: &[MembershipId],
        change: impl Fn(&mut RepositoryContent),
    ) -> Result<()> {
        let ids: BTreeSet<&MembershipId> = ids.iter().collect();
        let changed: Vec<RepositoryContent> = ids
            .into_iter()
            .filter_map(|id| self.working.ledger.get(id))
            .map(|record| {
                let mut record = record.clone();
                change(&mut record);
                record
            })
            .collect();
        self.working.check_ledger_keys(&changed)?;
        for record in changed {
            self.working.ledger.insert(record.id, record);
        }
        Ok(())
    }
}

impl LedgerTx for MemoryTx<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Repositories
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_repository(&mut self, repo: &Repository) -> Result<()> {
        let taken = self
            .working
            .repositories
            .values()
            .any(|r| r.name == repo.name && r.domain_id == repo.domain_id);
        if taken {
            return Err(StorageError::duplicate_name(&repo.name));
        }
        self.working.repositories.insert(repo.id, repo.clone());
        Ok(())
    }

    fn get_repository(&mut self, id: RepositoryId) -> Result<Option<Repository>> {
        Ok(self.working.repositories.get(&id).cloned())
    }

    fn repository_by_name(
        &mut self,
        name: &str,
        domain_id: DomainId,
    ) -> Result<Option<Repository>> {
        Ok(self
            .working
            .repositories
            .values()
            .find(|r| r.name == name && r.domain_id == domain_id)
            .cloned())
    }

    fn list_repositories(&mut self) -> Result<Vec<Repository>> {
        let mut repos: Vec<Repository> = self.working.repositories.values().cloned().collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(repos)
    }

    fn update_repository(&mut self, repo: &Repository) -> Result<()> {
        match self.working.repositories.get_mut(&repo.id) {
            Some(existing) => {
                *existing = repo.clone();
                Ok(())
            }
            None => Err(StorageError::repository_not_found(repo.id)),
        }
    }

    fn delete_repository(&mut self, id: RepositoryId) -> Result<()> {
        let state = &mut self.working;
        let versions = state.version_ids_of(id);
        let publications = state.publication_ids_of(&versions);

        state.ledger.retain(|_, r| r.repository_id != id);
        state.counts.retain(|v, _| !versions.contains(v));
        state.publications.retain(|p, _| !publications.contains(p));
        state.versions.retain(|v, _| !versions.contains(v));
        state.repositories.remove(&id);

        for dist in state.distributions.values_mut() {
            if dist.repository_id == Some(id) {
                dist.repository_id = None;
            }
            if dist.repository_version_id.map_or(false, |v| versions.contains(&v)) {
                dist.repository_version_id = None;
            }
            if dist.publication_id.map_or(false, |p| publications.contains(&p)) {
                dist.publication_id = None;
            }
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Versions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_version(&mut self, version: &RepositoryVersion) -> Result<()> {
        if !self.working.repositories.contains_key(&version.repository_id) {
            return Err(StorageError::repository_not_found(version.repository_id));
        }
        let taken = self
            .working
            .versions
            .values()
            .any(|v| v.repository_id == version.repository_id && v.number == version.number);
        if taken {
            return Err(StorageError::database(format!(
                "UNIQUE constraint failed: version {} of repository {}",
                version.number, version.repository_id
            )));
        }
        self.working.versions.insert(version.id, version.clone());
        Ok(())
    }

    fn get_version(&mut self, id: VersionId) -> Result<Option<RepositoryVersion>> {
        Ok(self.working.versions.get(&id).cloned())
    }

    fn version_by_number(
        &mut self,
        repository_id: RepositoryId,
        number: u32,
    ) -> Result<Option<RepositoryVersion>> {
        Ok(self
            .working
            .versions
            .values()
            .find(|v| v.repository_id == repository_id && v.number == number)
            .cloned())
    }

    fn list_versions(&mut self, repository_id: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        let mut versions: Vec<RepositoryVersion> = self
            .working
            .versions
            .values()
            .filter(|v| v.repository_id == repository_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.number);
        Ok(versions)
    }

    fn update_version(&mut self, version: &RepositoryVersion) -> Result<()> {
        match self.working.versions.get_mut(&version.id) {
            Some(existing) => {
                existing.complete = version.complete;
                existing.base_version_id = version.base_version_id;
                existing.content_ids = version.content_ids.clone();
                existing.info = version.info.clone();
                Ok(())
            }
            None => Err(StorageError::version_not_found(version)),
        }
    }

    fn delete_version(&mut self, id: VersionId) -> Result<()> {
        let state = &mut self.working;
        let dangling = state
            .ledger
            .values()
            .any(|r| r.version_added == id || r.version_removed == Some(id));
        if dangling {
            return Err(StorageError::database(format!(
                "FOREIGN KEY constraint failed: ledger still references version {}",
                id
            )));
        }

        let publications: BTreeSet<Uuid> = state
            .publications
            .values()
            .filter(|p| p.repository_version_id == id)
            .map(|p| p.id)
            .collect();
        state.publications.retain(|p, _| !publications.contains(p));
        state.counts.remove(&id);
        state.versions.remove(&id);

        for version in state.versions.values_mut() {
            if version.base_version_id == Some(id) {
                version.base_version_id = None;
            }
        }
        for dist in state.distributions.values_mut() {
            if dist.repository_version_id == Some(id) {
                dist.repository_version_id = None;
            }
            if dist.publication_id.map_or(false, |p| publications.contains(&p)) {
                dist.publication_id = None;
            }
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Content catalog
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_content(&mut self, units: &[ContentUnit]) -> Result<()> {
        for unit in units {
            self.working
                .content
                .entry(unit.id)
                .or_insert_with(|| unit.clone());
        }
        Ok(())
    }

    fn content_units(&mut self, ids: &[ContentId]) -> Result<Vec<ContentUnit>> {
        let unique: BTreeSet<&ContentId> = ids.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| self.working.content.get(id).cloned())
            .collect())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Ledger
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_memberships(
        &mut self,
        repository_id: RepositoryId,
        version_added: VersionId,
        content_ids: &[ContentId],
    ) -> Result<()> {
        let mut records = Vec::with_capacity(content_ids.len());
        let mut id = self.working.next_membership_id;
        for content_id in content_ids {
            if !self.working.content.contains_key(content_id) {
                return Err(StorageError::content_not_found(1));
            }
            id += 1;
            records.push(RepositoryContent {
                id,
                repository_id,
                content_id: *content_id,
                version_added,
                version_removed: None,
            });
        }
        self.working.check_ledger_keys(&records)?;

        self.working.next_membership_id = id;
        for record in records {
            self.working.ledger.insert(record.id, record);
        }
        Ok(())
    }

    fn memberships(
        &mut self,
        repository_id: RepositoryId,
        filter: &MembershipFilter<'_>,
    ) -> Result<Vec<RepositoryContent>> {
        Ok(self
            .working
            .ledger
            .values()
            .filter(|r| r.repository_id == repository_id && filter.matches(r))
            .cloned()
            .collect())
    }

    fn memberships_for_content(&mut self, ids: &[ContentId]) -> Result<Vec<RepositoryContent>> {
        Ok(self
            .working
            .ledger
            .values()
            .filter(|r| ids.contains(&r.content_id))
            .cloned()
            .collect())
    }

    fn delete_memberships(&mut self, ids: &[MembershipId]) -> Result<()> {
        for id in ids {
            self.working.ledger.remove(id);
        }
        Ok(())
    }

    fn set_version_added(&mut self, ids: &[MembershipId], version_id: VersionId) -> Result<()> {
        self.update_records(ids, |record| record.version_added = version_id)
    }

    fn set_version_removed(
        &mut self,
        ids: &[MembershipId],
        version_id: Option<VersionId>,
    ) -> Result<()> {
        self.update_records(ids, |record| record.version_removed = version_id)
    }

    fn count_references(&mut self, version_id: VersionId) -> Result<u64> {
        Ok(self
            .working
            .ledger
            .values()
            .filter(|r| r.version_added == version_id || r.version_removed == Some(version_id))
            .count() as u64)
    }

    fn content_at(&mut self, repository_id: RepositoryId, number: u32) -> Result<Vec<ContentId>> {
        let state = &self.working;
        let present: BTreeSet<ContentId> = state
            .ledger
            .values()
            .filter(|r| r.repository_id == repository_id)
            .filter(|r| {
                let added = state.version_number(r.version_added);
                let removed = r.version_removed.and_then(|v| state.version_number(v));
                added.map_or(false, |a| a <= number)
                    && removed.map_or(true, |rm| rm > number)
            })
            .map(|r| r.content_id)
            .collect();
        Ok(present.into_iter().collect())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Count summaries
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn replace_counts(&mut self, version_id: VersionId, counts: &[ContentCount]) -> Result<()> {
        self.working.counts.insert(version_id, counts.to_vec());
        Ok(())
    }

    fn counts(&mut self, version_id: VersionId) -> Result<Vec<ContentCount>> {
        let mut counts = self
            .working
            .counts
            .get(&version_id)
            .cloned()
            .unwrap_or_default();
        counts.sort();
        Ok(counts)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Publications & distributions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn insert_publication(&mut self, publication: &Publication) -> Result<()> {
        if !self
            .working
            .versions
            .contains_key(&publication.repository_version_id)
        {
            return Err(StorageError::version_not_found(
                publication.repository_version_id,
            ));
        }
        self.working
            .publications
            .insert(publication.id, publication.clone());
        Ok(())
    }

    fn publications(&mut self, repository_id: RepositoryId) -> Result<Vec<Publication>> {
        let versions = self.working.version_ids_of(repository_id);
        let mut publications: Vec<Publication> = self
            .working
            .publications
            .values()
            .filter(|p| versions.contains(&p.repository_version_id))
            .cloned()
            .collect();
        publications.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(publications)
    }

    fn insert_distribution(&mut self, distribution: &Distribution) -> Result<()> {
        let taken = self
            .working
            .distributions
            .values()
            .any(|d| d.base_path == distribution.base_path || d.name == distribution.name);
        if taken {
            return Err(StorageError::duplicate_name(&distribution.base_path));
        }
        self.working
            .distributions
            .insert(distribution.id, distribution.clone());
        Ok(())
    }

    fn delete_distribution(&mut self, id: Uuid) -> Result<()> {
        self.working.distributions.remove(&id);
        Ok(())
    }

    fn distributions(&mut self, repository_id: RepositoryId) -> Result<Vec<Distribution>> {
        let versions = self.working.version_ids_of(repository_id);
        let publications = self.working.publication_ids_of(&versions);
        let mut distributions: Vec<Distribution> = self
            .working
            .distributions
            .values()
            .filter(|d| {
                d.repository_id == Some(repository_id)
                    || d.repository_version_id.map_or(false, |v| versions.contains(&v))
                    || d.publication_id.map_or(false, |p| publications.contains(&p))
            })
            .cloned()
            .collect();
        distributions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(distributions)
    }
}
