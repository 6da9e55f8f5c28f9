//! Version Mutation Engine
//!
//! Records content changes of an open version in the ledger while keeping
//! it normalized: a version never carries both an add record and a removal
//! for the same content, and never two add records for one content.

use std::collections::BTreeSet;

use tracing::debug;

use super::materializer::{self, batches};
use crate::domain::{
    ContentId, LedgerTx, MembershipFilter, MembershipId, Repository, RepositoryVersion,
};
use crate::{Result, StorageError};

/// Mutable view of one open version inside a transaction
pub struct VersionEditor<'a> {
    tx: &'a mut dyn LedgerTx,
    repository: &'a Repository,
    version: &'a mut RepositoryVersion,
    batch_size: usize,
}

impl<'a> VersionEditor<'a> {
    pub fn new(
        tx: &'a mut dyn LedgerTx,
        repository: &'a Repository,
        version: &'a mut RepositoryVersion,
        batch_size: usize,
    ) -> Self {
        Self {
            tx,
            repository,
            version,
            batch_size,
        }
    }

    pub fn repository(&self) -> &Repository {
        self.repository
    }

    pub fn version(&self) -> &RepositoryVersion {
        self.version
    }

    /// Free-form metadata of the version, persisted with the next write
    pub fn info_mut(&mut self) -> &mut serde_json::Value {
        &mut self.version.info
    }

    /// Persist the version row (snapshot and info) as it stands
    pub fn save(&mut self) -> Result<()> {
        self.tx.update_version(self.version)
    }

    pub fn content_ids(&mut self) -> Result<BTreeSet<ContentId>> {
        materializer::content_ids(self.tx, self.version)
    }

    /// Add content to the version.
    ///
    /// Content already present is ignored. Content this version removed
    /// earlier gets its removal cleared instead of a second add record.
    pub fn add_content(&mut self, ids: &BTreeSet<ContentId>) -> Result<()> {
        self.ensure_open()?;

        let current = self.content_ids()?;
        let to_add: Vec<ContentId> = ids.difference(&current).copied().collect();
        if to_add.is_empty() {
            return Ok(());
        }
        self.check_catalog(&to_add)?;

        let repository_id = self.repository.id;
        let version_id = self.version.id;

        let mut fresh: BTreeSet<ContentId> = to_add.iter().copied().collect();
        let mut readded = 0usize;
        for batch in batches(&to_add, self.batch_size) {
            let removals = self.tx.memberships(
                repository_id,
                &MembershipFilter::removed_by(version_id).with_content(batch),
            )?;
            if removals.is_empty() {
                continue;
            }
            let record_ids: Vec<MembershipId> = removals.iter().map(|r| r.id).collect();
            self.tx.set_version_removed(&record_ids, None)?;
            for record in &removals {
                fresh.remove(&record.content_id);
            }
            readded += removals.len();
        }

        let fresh: Vec<ContentId> = fresh.into_iter().collect();
        for batch in batches(&fresh, self.batch_size) {
            self.tx.insert_memberships(repository_id, version_id, batch)?;
        }

        let mut snapshot = current;
        snapshot.extend(to_add.iter().copied());
        self.version.content_ids = Some(snapshot);
        self.tx.update_version(self.version)?;

        debug!(
            version = %self.version,
            added = fresh.len(),
            readded,
            "Added content"
        );
        Ok(())
    }

    /// Remove content from the version.
    ///
    /// Content this version added itself loses its add record; content
    /// inherited from earlier versions gets this version as remover.
    pub fn remove_content(&mut self, ids: &BTreeSet<ContentId>) -> Result<()> {
        self.ensure_open()?;

        let current = self.content_ids()?;
        let to_remove: Vec<ContentId> = ids.intersection(&current).copied().collect();
        if to_remove.is_empty() {
            return Ok(());
        }

        let repository_id = self.repository.id;
        let version_id = self.version.id;

        let mut dropped = 0usize;
        let mut closed = 0usize;
        for batch in batches(&to_remove, self.batch_size) {
            let open = self
                .tx
                .memberships(repository_id, &MembershipFilter::open().with_content(batch))?;

            let (own, inherited): (Vec<_>, Vec<_>) =
                open.into_iter().partition(|r| r.version_added == version_id);

            let own: Vec<MembershipId> = own.into_iter().map(|r| r.id).collect();
            let inherited: Vec<MembershipId> = inherited.into_iter().map(|r| r.id).collect();
            if !own.is_empty() {
                self.tx.delete_memberships(&own)?;
            }
            if !inherited.is_empty() {
                self.tx.set_version_removed(&inherited, Some(version_id))?;
            }
            dropped += own.len();
            closed += inherited.len();
        }

        let mut snapshot = current;
        for id in &to_remove {
            snapshot.remove(id);
        }
        self.version.content_ids = Some(snapshot);
        self.tx.update_version(self.version)?;

        debug!(version = %self.version, dropped, closed, "Removed content");
        Ok(())
    }

    /// Make the version contain exactly `ids`.
    pub fn set_content(&mut self, ids: &BTreeSet<ContentId>) -> Result<()> {
        self.ensure_open()?;

        let current = self.content_ids()?;
        let to_remove: BTreeSet<ContentId> = current.difference(ids).copied().collect();
        let to_add: BTreeSet<ContentId> = ids.difference(&current).copied().collect();

        self.remove_content(&to_remove)?;
        self.add_content(&to_add)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.version.complete {
            return Err(StorageError::immutable_version(
                self.version.repository_id,
                self.version.number,
            ));
        }
        Ok(())
    }

    /// Every id must be registered and live in the repository's domain.
    fn check_catalog(&mut self, ids: &[ContentId]) -> Result<()> {
        let mut found = 0usize;
        let mut foreign = 0usize;
        for batch in batches(ids, self.batch_size) {
            let units = self.tx.content_units(batch)?;
            found += units.len();
            foreign += units
                .iter()
                .filter(|u| u.domain_id != self.repository.domain_id)
                .count();
        }

        if foreign > 0 {
            return Err(StorageError::domain_mismatch(self.repository.id, foreign)
                .with_version(self.repository.id, self.version.number));
        }
        if found < ids.len() {
            return Err(StorageError::content_not_found(ids.len() - found)
                .with_version(self.repository.id, self.version.number));
        }
        Ok(())
    }
}
