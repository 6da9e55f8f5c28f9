//! Retention & Protection Policy
//!
//! A version is protected while a consumer may still read it:
//!
//! - a distribution serves it directly
//! - a distribution serves a publication built from it
//! - a checkpoint distribution points at the repository and a checkpoint
//!   publication was built from it
//! - the repository's first non-checkpoint distribution currently resolves
//!   to it (latest published version, or latest complete version)
//!
//! Retention keeps the newest `retain_repo_versions` unprotected complete
//! versions and deletes the rest oldest-first, one transaction per version.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::lifecycle;
use crate::domain::{LedgerTx, RepositoryId, RepositoryVersion, VersionId, VersionStore};
use crate::{Result, StorageError};

/// Versions of the repository that must not be deleted
pub fn protected_versions(
    tx: &mut dyn LedgerTx,
    repository_id: RepositoryId,
) -> Result<BTreeSet<VersionId>> {
    let versions = tx.list_versions(repository_id)?;
    let own: BTreeSet<VersionId> = versions.iter().map(|v| v.id).collect();
    let publications = tx.publications(repository_id)?;
    let distributions = tx.distributions(repository_id)?;

    let mut protected = BTreeSet::new();

    for distribution in &distributions {
        if let Some(version_id) = distribution.repository_version_id {
            if own.contains(&version_id) {
                protected.insert(version_id);
            }
        }
        if let Some(publication_id) = distribution.publication_id {
            protected.extend(
                publications
                    .iter()
                    .filter(|p| p.id == publication_id)
                    .map(|p| p.repository_version_id),
            );
        }
    }

    let serves_repository = |checkpoint: bool| {
        distributions
            .iter()
            .find(|d| d.repository_id == Some(repository_id) && d.checkpoint == checkpoint)
    };

    if serves_repository(true).is_some() {
        protected.extend(
            publications
                .iter()
                .filter(|p| p.checkpoint)
                .map(|p| p.repository_version_id),
        );
    }

    if let Some(distribution) = serves_repository(false) {
        let resolved = if distribution.serve_from_publication {
            let published: BTreeSet<VersionId> = publications
                .iter()
                .filter(|p| p.complete)
                .map(|p| p.repository_version_id)
                .collect();
            versions
                .iter()
                .filter(|v| published.contains(&v.id))
                .max_by_key(|v| v.number)
        } else {
            versions
                .iter()
                .filter(|v| v.complete)
                .max_by_key(|v| v.number)
        };
        if let Some(version) = resolved {
            protected.insert(version.id);
        }
    }

    Ok(protected)
}

/// Versions retention would delete right now, oldest first
pub fn retention_candidates(
    tx: &mut dyn LedgerTx,
    repository_id: RepositoryId,
) -> Result<Vec<RepositoryVersion>> {
    let repository = tx
        .get_repository(repository_id)?
        .ok_or_else(|| StorageError::repository_not_found(repository_id))?;

    let versions = tx.list_versions(repository_id)?;
    if let Some(open) = versions.iter().find(|v| !v.complete) {
        return Err(StorageError::concurrent_mutation(
            repository_id,
            format!(
                "Attempt to clean up old versions while version {} is in flight",
                open.number
            ),
        ));
    }

    let Some(retain) = repository.retain_repo_versions else {
        return Ok(Vec::new());
    };

    let protected = protected_versions(tx, repository_id)?;
    let mut candidates: Vec<RepositoryVersion> = versions
        .into_iter()
        .filter(|v| v.complete && !protected.contains(&v.id))
        .collect();
    candidates.sort_by(|a, b| b.number.cmp(&a.number));

    let mut doomed = candidates.split_off(candidates.len().min(retain as usize));
    doomed.reverse();
    Ok(doomed)
}

/// Apply the repository's retention limit.
///
/// Each deletion commits on its own; an error stops the sweep and leaves the
/// deletions already made in place.
pub fn cleanup_old_versions<S>(
    store: &S,
    repository_id: RepositoryId,
    batch_size: usize,
) -> Result<Vec<RepositoryVersion>>
where
    S: VersionStore + ?Sized,
{
    let doomed = {
        let mut tx = store.begin()?;
        retention_candidates(tx.as_mut(), repository_id)?
    };
    if doomed.is_empty() {
        debug!(repository = %repository_id, "Nothing to clean up");
        return Ok(Vec::new());
    }

    let mut deleted = Vec::with_capacity(doomed.len());
    for version in doomed {
        let mut tx = store.begin()?;
        // Another caller may have deleted it since the sweep was planned.
        let Some(current) = tx.get_version(version.id)? else {
            continue;
        };
        info!(
            version = %current,
            "Deleting repository version due to version retention limit"
        );
        lifecycle::delete_version(tx.as_mut(), &current, batch_size)?;
        tx.commit()?;
        deleted.push(current);
    }
    Ok(deleted)
}
