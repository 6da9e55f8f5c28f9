//! VersionHandle - a version under construction
//!
//! The handle owns its open version until [`VersionHandle::finalize`] or
//! [`VersionHandle::discard`]. A handle dropped while still open discards its
//! version on the spot, and a failed mutation discards it as well, so an open
//! version never outlives the code that was building it.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::service::RepositoryService;
use crate::domain::{ContentId, Repository, RepositoryKind, RepositoryVersion};
use crate::versioning::{self, materializer, Finalized, VersionEditor};
use crate::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Open,
    /// Sealed; retention and the kind's `on_new_version` hook still pending
    Sealed,
    Finished,
}

/// Open version of a repository
pub struct VersionHandle {
    service: RepositoryService,
    repository: Repository,
    version: RepositoryVersion,
    state: HandleState,
}

impl VersionHandle {
    pub(crate) fn new(
        service: RepositoryService,
        repository: Repository,
        version: RepositoryVersion,
    ) -> Self {
        Self {
            service,
            repository,
            version,
            state: HandleState::Open,
        }
    }

    pub fn version(&self) -> &RepositoryVersion {
        &self.version
    }

    pub fn number(&self) -> u32 {
        self.version.number
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// Current content of the open version
    pub async fn content(&self) -> Result<BTreeSet<ContentId>> {
        self.ensure_open()?;
        self.service
            .inner
            .read(|tx| materializer::content_ids(tx, &self.version))
    }

    pub async fn add_content(&mut self, ids: &BTreeSet<ContentId>) -> Result<()> {
        self.edit(|editor| editor.add_content(ids))
    }

    pub async fn remove_content(&mut self, ids: &BTreeSet<ContentId>) -> Result<()> {
        self.edit(|editor| editor.remove_content(ids))
    }

    pub async fn set_content(&mut self, ids: &BTreeSet<ContentId>) -> Result<()> {
        self.edit(|editor| editor.set_content(ids))
    }

    /// Seal the version, or discard it when it changed nothing.
    ///
    /// Returns the sealed version. Retention cleanup and the kind's
    /// `on_new_version` hook run after the seal. If either fails, the sealed
    /// version is deleted again before the error is returned.
    pub async fn finalize(mut self) -> Result<Option<RepositoryVersion>> {
        self.ensure_open()?;
        let inner = self.service.inner.clone();

        let sealed = {
            let repository = &self.repository;
            let version = &mut self.version;
            inner.write(|tx| {
                let mut repository = tx
                    .get_repository(repository.id)?
                    .ok_or_else(|| StorageError::repository_not_found(repository.id))?;
                let kind = inner.kinds.get(&repository.kind)?;
                let outcome = versioning::seal_version(
                    tx,
                    &mut repository,
                    version,
                    kind.as_ref(),
                    inner.batch_size,
                )?;
                let base_paths = super::service::ServiceInner::repository_base_paths(tx, repository.id)?;
                Ok((outcome, repository, kind, base_paths))
            })
        };

        let (outcome, repository, kind, base_paths) = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                self.abandon();
                return Err(e);
            }
        };

        let version = match outcome {
            Finalized::Discarded => {
                self.release();
                return Ok(None);
            }
            Finalized::Sealed(version) => version,
        };
        self.repository = repository;
        self.state = HandleState::Sealed;

        inner.invalidate(base_paths.clone()).await;

        if let Err(e) = self.retain_and_notify(&version, kind.as_ref()) {
            self.unseal(&version, base_paths).await;
            self.release();
            return Err(e);
        }
        self.release();
        Ok(Some(version))
    }

    /// Throw the version away
    pub async fn discard(mut self) -> Result<()> {
        self.ensure_open()?;
        let result = self.discard_now();
        self.release();
        result
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            HandleState::Open => Ok(()),
            HandleState::Sealed | HandleState::Finished => Err(StorageError::version_not_found(format!(
                "{} (no longer open)",
                self.version
            ))),
        }
    }

    /// Apply one mutation in its own transaction; any failure discards.
    fn edit(&mut self, f: impl FnOnce(&mut VersionEditor<'_>) -> Result<()>) -> Result<()> {
        self.ensure_open()?;
        let inner = self.service.inner.clone();
        let mut version = self.version.clone();

        let result = inner.write(|tx| {
            let mut editor =
                VersionEditor::new(tx, &self.repository, &mut version, inner.batch_size);
            f(&mut editor)
        });

        match result {
            Ok(()) => {
                self.version = version;
                Ok(())
            }
            Err(e) => {
                self.abandon();
                Err(e)
            }
        }
    }

    fn retain_and_notify(&self, version: &RepositoryVersion, kind: &dyn RepositoryKind) -> Result<()> {
        if self.repository.retain_repo_versions.is_some() {
            let deleted = self.service.inner.cleanup(self.repository.id)?;
            if !deleted.is_empty() {
                info!(
                    repository = %self.repository,
                    deleted = deleted.len(),
                    "Retention removed old versions"
                );
            }
        }
        kind.on_new_version(version)
    }

    /// Delete a sealed version whose follow-up steps failed, keeping the
    /// original error
    async fn unseal(&self, version: &RepositoryVersion, base_paths: Vec<String>) {
        let inner = &self.service.inner;
        let deleted = inner.write(|tx| match tx.get_version(version.id)? {
            Some(current) => versioning::delete_version(tx, &current, inner.batch_size),
            None => Ok(()),
        });
        match deleted {
            Ok(()) => {
                info!(version = %version, "Deleted sealed version after error");
                inner.invalidate(base_paths).await;
            }
            Err(e) => {
                warn!(version = %version, error = %e, "Failed to delete sealed version");
            }
        }
    }

    fn discard_now(&self) -> Result<()> {
        let inner = &self.service.inner;
        inner.write(|tx| match tx.get_version(self.version.id)? {
            Some(current) if !current.complete => {
                versioning::discard_version(tx, &current, inner.batch_size)
            }
            _ => Ok(()),
        })
    }

    /// Discard after a failure, keeping the original error
    fn abandon(&mut self) {
        if let Err(e) = self.discard_now() {
            warn!(version = %self.version, error = %e, "Failed to discard version");
        } else {
            info!(version = %self.version, "Discarded version after error");
        }
        self.release();
    }

    fn release(&mut self) {
        if self.state != HandleState::Finished {
            self.state = HandleState::Finished;
            self.service.inner.live.lock().remove(&self.repository.id);
        }
    }
}

impl Drop for VersionHandle {
    fn drop(&mut self) {
        match self.state {
            HandleState::Open => {
                warn!(version = %self.version, "Version handle dropped while open");
                self.abandon();
            }
            HandleState::Sealed => self.release(),
            HandleState::Finished => {}
        }
    }
}

impl std::fmt::Debug for VersionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionHandle")
            .field("version", &self.version)
            .field("state", &self.state)
            .finish()
    }
}
