//! Version Materializer
//!
//! Answers "which content is in version V". A version's cached snapshot is
//! returned as-is; without one the ledger is scanned with the predicate
//! `added.number <= V < removed.number`.
//!
//! Every IN-list sent to the store is cut into `batch_size` slices so very
//! large snapshots never become one unbounded query.

use std::collections::{BTreeSet, HashMap};

use crate::domain::{
    ContentId, ContentUnit, LedgerTx, MembershipFilter, RepositoryId, RepositoryVersion,
};
use crate::Result;

/// Split `items` into bounded slices.
pub fn batches<T>(items: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(batch_size.max(1))
}

/// Membership of `version`
pub fn content_ids(tx: &mut dyn LedgerTx, version: &RepositoryVersion) -> Result<BTreeSet<ContentId>> {
    match &version.content_ids {
        Some(ids) => Ok(ids.clone()),
        None => derive_from_ledger(tx, version),
    }
}

/// Membership of `version` from the ledger, ignoring any snapshot
pub fn derive_from_ledger(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
) -> Result<BTreeSet<ContentId>> {
    Ok(tx
        .content_at(version.repository_id, version.number)?
        .into_iter()
        .collect())
}

/// Closest complete version numbered below `number`
pub fn previous_complete(
    tx: &mut dyn LedgerTx,
    repository_id: RepositoryId,
    number: u32,
) -> Result<Option<RepositoryVersion>> {
    Ok(tx
        .list_versions(repository_id)?
        .into_iter()
        .filter(|v| v.complete && v.number < number)
        .max_by_key(|v| v.number))
}

/// Closest complete version numbered above `number`
pub fn next_complete(
    tx: &mut dyn LedgerTx,
    repository_id: RepositoryId,
    number: u32,
) -> Result<Option<RepositoryVersion>> {
    Ok(tx
        .list_versions(repository_id)?
        .into_iter()
        .filter(|v| v.complete && v.number > number)
        .min_by_key(|v| v.number))
}

/// Latest complete version
pub fn latest_complete(
    tx: &mut dyn LedgerTx,
    repository_id: RepositoryId,
) -> Result<Option<RepositoryVersion>> {
    Ok(tx
        .list_versions(repository_id)?
        .into_iter()
        .filter(|v| v.complete)
        .max_by_key(|v| v.number))
}

/// Starting snapshot for a version about to be created with `number`.
///
/// Copies the previous complete version's snapshot when it has one, so the
/// cost does not grow with the repository's history.
pub fn initial_snapshot(
    tx: &mut dyn LedgerTx,
    repository_id: RepositoryId,
    number: u32,
) -> Result<BTreeSet<ContentId>> {
    if let Some(previous) = previous_complete(tx, repository_id, number)? {
        if let Some(ids) = previous.content_ids {
            return Ok(ids);
        }
    }
    Ok(tx.content_at(repository_id, number)?.into_iter().collect())
}

/// Content added by `version`.
///
/// Without a base these are the ledger records the version is credited with;
/// with a base it is the plain set difference `version - base`.
pub fn added(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    base: Option<&RepositoryVersion>,
) -> Result<BTreeSet<ContentId>> {
    match base {
        None => Ok(tx
            .memberships(version.repository_id, &MembershipFilter::added_by(version.id))?
            .into_iter()
            .map(|r| r.content_id)
            .collect()),
        Some(base) => {
            let current = content_ids(tx, version)?;
            let base = content_ids(tx, base)?;
            Ok(current.difference(&base).copied().collect())
        }
    }
}

/// Content removed by `version` (see [`added`])
pub fn removed(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    base: Option<&RepositoryVersion>,
) -> Result<BTreeSet<ContentId>> {
    match base {
        None => Ok(tx
            .memberships(version.repository_id, &MembershipFilter::removed_by(version.id))?
            .into_iter()
            .map(|r| r.content_id)
            .collect()),
        Some(base) => {
            let current = content_ids(tx, version)?;
            let base = content_ids(tx, base)?;
            Ok(base.difference(&current).copied().collect())
        }
    }
}

pub fn contains(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    content_id: ContentId,
) -> Result<bool> {
    if let Some(ids) = &version.content_ids {
        return Ok(ids.contains(&content_id));
    }
    Ok(derive_from_ledger(tx, version)?.contains(&content_id))
}

/// Catalog entries for `ids`, ordered by id
pub fn content_units(
    tx: &mut dyn LedgerTx,
    ids: &BTreeSet<ContentId>,
    batch_size: usize,
) -> Result<Vec<ContentUnit>> {
    let ids: Vec<ContentId> = ids.iter().copied().collect();
    let mut units = Vec::with_capacity(ids.len());
    for batch in batches(&ids, batch_size) {
        units.extend(tx.content_units(batch)?);
    }
    units.sort_by_key(|u| u.id);
    Ok(units)
}

/// The version's content units in slices of at most `batch_size`, ordered by id
pub fn content_batches(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    batch_size: usize,
) -> Result<Vec<Vec<ContentUnit>>> {
    let ids: Vec<ContentId> = content_ids(tx, version)?.into_iter().collect();
    let mut out = Vec::new();
    for batch in batches(&ids, batch_size) {
        let mut units = tx.content_units(batch)?;
        units.sort_by_key(|u| u.id);
        out.push(units);
    }
    Ok(out)
}

/// Versions of any repository that contain at least one of `ids`
pub fn versions_with_content(
    tx: &mut dyn LedgerTx,
    ids: &BTreeSet<ContentId>,
    batch_size: usize,
) -> Result<Vec<RepositoryVersion>> {
    let ids: Vec<ContentId> = ids.iter().copied().collect();
    let mut records = Vec::new();
    for batch in batches(&ids, batch_size) {
        records.extend(tx.memberships_for_content(batch)?);
    }

    let mut versions_by_repo: HashMap<RepositoryId, Vec<RepositoryVersion>> = HashMap::new();
    let mut matched: BTreeSet<(RepositoryId, u32)> = BTreeSet::new();
    let mut result = Vec::new();

    for record in records {
        if !versions_by_repo.contains_key(&record.repository_id) {
            let versions = tx.list_versions(record.repository_id)?;
            versions_by_repo.insert(record.repository_id, versions);
        }
        let versions = &versions_by_repo[&record.repository_id];
        let number_of = |id| versions.iter().find(|v| v.id == id).map(|v| v.number);

        let Some(start) = number_of(record.version_added) else {
            continue;
        };
        let end = record.version_removed.and_then(number_of);

        for version in versions {
            let inside = version.number >= start && end.map_or(true, |end| version.number < end);
            if inside && matched.insert((version.repository_id, version.number)) {
                result.push(version.clone());
            }
        }
    }

    result.sort_by_key(|v| (v.repository_id, v.number));
    Ok(result)
}
