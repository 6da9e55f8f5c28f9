//! Version construction, sealing and deletion
//!
//! ```text
//!              open_version
//!                   │
//!                   ▼
//!   ┌──────────── Open ────────────┐
//!   │ no net change / error        │ seal_version (net change)
//!   ▼                              ▼
//! Discarded                     Sealed ──delete_version──▶ squashed into successor
//! ```
//!
//! Every function here runs inside the caller's transaction and leaves the
//! commit to the caller.

use tracing::{debug, info, warn};

use super::counts::{compute_counts, content_types};
use super::materializer;
use super::mutation::VersionEditor;
use super::retention::protected_versions;
use super::squash::{retract, squash};
use crate::domain::{LedgerTx, Repository, RepositoryKind, RepositoryVersion};
use crate::{Result, StorageError};

/// Outcome of finalizing an open version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// The version is complete and visible
    Sealed(RepositoryVersion),
    /// The version had no net change and is gone
    Discarded,
}

/// Give a freshly inserted repository its empty, complete version 0.
pub fn create_initial_version(
    tx: &mut dyn LedgerTx,
    repository: &mut Repository,
) -> Result<RepositoryVersion> {
    let mut version = RepositoryVersion::new(repository.id, 0);
    version.complete = true;
    version.content_ids = Some(Default::default());
    tx.insert_version(&version)?;

    repository.next_version = 1;
    tx.update_repository(repository)?;
    Ok(version)
}

/// Open the next version of `repository`.
///
/// The version starts as a clone of the latest complete version, reset to
/// `base`'s content when given. A stale open version left behind by a dead
/// writer is discarded first; `held` means a live writer still owns it.
pub fn open_version(
    tx: &mut dyn LedgerTx,
    repository: &Repository,
    kind: &dyn RepositoryKind,
    base: Option<&RepositoryVersion>,
    held: bool,
    batch_size: usize,
) -> Result<RepositoryVersion> {
    let stale: Vec<RepositoryVersion> = tx
        .list_versions(repository.id)?
        .into_iter()
        .filter(|v| !v.complete)
        .collect();
    for version in &stale {
        if held {
            return Err(StorageError::concurrent_mutation(
                repository.id,
                format!("Version {} of {} is still being built", version.number, repository),
            ));
        }
        warn!(version = %version, "Discarding stale incomplete version");
        discard_version(tx, version, batch_size)?;
    }

    let number = repository.next_version;
    let mut version = RepositoryVersion::new(repository.id, number);
    version.base_version_id = base.map(|b| b.id);
    version.content_ids = Some(materializer::initial_snapshot(tx, repository.id, number)?);
    tx.insert_version(&version)?;

    let base_content = match base {
        Some(base) => Some(materializer::content_ids(tx, base)?),
        None => None,
    };

    let mut editor = VersionEditor::new(tx, repository, &mut version, batch_size);
    if let Some(base_content) = base_content {
        editor.set_content(&base_content)?;
    }
    kind.initialize_new_version(&mut editor)?;
    editor.save()?;
    drop(editor);

    debug!(version = %version, base = ?version.base_version_id, "Opened version");
    Ok(version)
}

/// Finalize an open version.
///
/// Runs the kind's finalize hook, discards the version when it changed
/// nothing, otherwise checks content types and seals it. An error leaves the
/// transaction dirty; the caller drops it and discards the version.
pub fn seal_version(
    tx: &mut dyn LedgerTx,
    repository: &mut Repository,
    version: &mut RepositoryVersion,
    kind: &dyn RepositoryKind,
    batch_size: usize,
) -> Result<Finalized> {
    if version.complete {
        return Err(StorageError::immutable_version(repository.id, version.number));
    }

    {
        let mut editor = VersionEditor::new(tx, repository, version, batch_size);
        kind.finalize_new_version(&mut editor)?;
        editor.save()?;
    }

    let added = materializer::added(tx, version, None)?;
    let removed = materializer::removed(tx, version, None)?;
    if added.is_empty() && removed.is_empty() {
        discard_version(tx, version, batch_size)?;
        info!(version = %version, "Discarded version without changes");
        return Ok(Finalized::Discarded);
    }

    let present = materializer::content_ids(tx, version)?;
    let unsupported: Vec<String> = content_types(tx, &present, batch_size)?
        .into_iter()
        .filter(|t| !kind.supports(t))
        .collect();
    if !unsupported.is_empty() {
        return Err(StorageError::unsupported_content_types(
            repository.id,
            version.number,
            &unsupported,
        ));
    }

    version.complete = true;
    repository.next_version = version.number + 1;
    tx.update_repository(repository)?;
    tx.update_version(version)?;
    compute_counts(tx, version, batch_size)?;

    info!(
        version = %version,
        added = added.len(),
        removed = removed.len(),
        present = present.len(),
        "Sealed version"
    );
    Ok(Finalized::Sealed(version.clone()))
}

/// Throw away an open version and every change it recorded.
pub fn discard_version(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    batch_size: usize,
) -> Result<()> {
    if version.complete {
        return Err(StorageError::immutable_version(
            version.repository_id,
            version.number,
        ));
    }
    retract(tx, version, batch_size)?;
    tx.delete_version(version.id)?;
    debug!(version = %version, "Discarded version");
    Ok(())
}

/// Delete a version.
///
/// An open version is discarded. A sealed version is folded into its next
/// complete successor, or simply retracted when it is the latest, after
/// which no ledger record may still name it.
pub fn delete_version(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    batch_size: usize,
) -> Result<()> {
    if !version.complete {
        return discard_version(tx, version, batch_size);
    }

    let repository_id = version.repository_id;
    let versions = tx.list_versions(repository_id)?;
    if let Some(open) = versions.iter().find(|v| !v.complete) {
        return Err(StorageError::concurrent_mutation(
            repository_id,
            format!(
                "Cannot delete version {} while version {} is in flight",
                version.number, open.number
            ),
        ));
    }
    if versions.iter().filter(|v| v.complete).count() <= 1 {
        return Err(StorageError::last_version(repository_id, version.number));
    }
    if protected_versions(tx, repository_id)?.contains(&version.id) {
        return Err(StorageError::protected_version(repository_id, version.number));
    }

    match materializer::next_complete(tx, repository_id, version.number)? {
        Some(next) => squash(tx, version, &next, batch_size)?,
        None => retract(tx, version, batch_size)?,
    }

    let dangling = tx.count_references(version.id)?;
    if dangling > 0 {
        return Err(StorageError::consistency(
            repository_id,
            version.number,
            format!(
                "{} ledger records still reference version {} after compaction",
                dangling, version.number
            ),
        ));
    }

    tx.delete_version(version.id)?;
    info!(version = %version, "Deleted version");
    Ok(())
}
