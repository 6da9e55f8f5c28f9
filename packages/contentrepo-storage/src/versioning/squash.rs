//! Version Compactor
//!
//! Folds a sealed version's ledger records into its successor so the version
//! can be deleted without changing what any other version contains.
//!
//! ```text
//!   V-1        V          N        N+1
//!    │   add c ●───────────────────▶      (moved: version_added V → N)
//!    ●─────────○ rm d                      (moved: version_removed V → N)
//!              ● add e ───○ rm e           (dropped: only V ever had e)
//!    ●─────────○ rm f ● add f ──○ rm f     (merged: V-removal takes N+1)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::counts::compute_counts;
use super::materializer::batches;
use crate::domain::{
    ContentId, LedgerTx, MembershipFilter, MembershipId, RepositoryContent, RepositoryVersion,
    VersionId,
};
use crate::Result;

fn record_ids(records: &[RepositoryContent]) -> Vec<MembershipId> {
    records.iter().map(|r| r.id).collect()
}

/// Fold `version` into `next`, its closest complete successor.
pub fn squash(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    next: &RepositoryVersion,
    batch_size: usize,
) -> Result<()> {
    let repository_id = version.repository_id;

    // Content that only ever lived in `version`
    let transient = tx.memberships(
        repository_id,
        &MembershipFilter {
            added_by: Some(version.id),
            removed_by: Some(next.id),
            ..Default::default()
        },
    )?;
    for batch in batches(&record_ids(&transient), batch_size) {
        tx.delete_memberships(batch)?;
    }

    // Content removed by `version` and added back by `next`
    let added_by_next: BTreeSet<ContentId> = tx
        .memberships(repository_id, &MembershipFilter::added_by(next.id))?
        .into_iter()
        .map(|r| r.content_id)
        .collect();
    let removed_by_version =
        tx.memberships(repository_id, &MembershipFilter::removed_by(version.id))?;
    let readded: Vec<ContentId> = removed_by_version
        .iter()
        .map(|r| r.content_id)
        .filter(|id| added_by_next.contains(id))
        .collect();

    let mut readd_records = Vec::new();
    for batch in batches(&readded, batch_size) {
        readd_records.extend(tx.memberships(
            repository_id,
            &MembershipFilter::added_by(next.id).with_content(batch),
        )?);
    }

    // The re-add record's end of life carries over to the original record.
    let mut end_of_life: BTreeMap<Option<VersionId>, BTreeSet<ContentId>> = BTreeMap::new();
    for record in &readd_records {
        end_of_life
            .entry(record.version_removed)
            .or_default()
            .insert(record.content_id);
    }
    for batch in batches(&record_ids(&readd_records), batch_size) {
        tx.delete_memberships(batch)?;
    }
    for (removed_by, content_ids) in &end_of_life {
        let originals: Vec<MembershipId> = removed_by_version
            .iter()
            .filter(|r| content_ids.contains(&r.content_id))
            .map(|r| r.id)
            .collect();
        for batch in batches(&originals, batch_size) {
            tx.set_version_removed(batch, *removed_by)?;
        }
    }

    // Everything else moves forward
    let added = tx.memberships(repository_id, &MembershipFilter::added_by(version.id))?;
    for batch in batches(&record_ids(&added), batch_size) {
        tx.set_version_added(batch, next.id)?;
    }
    let removed = tx.memberships(repository_id, &MembershipFilter::removed_by(version.id))?;
    for batch in batches(&record_ids(&removed), batch_size) {
        tx.set_version_removed(batch, Some(next.id))?;
    }

    compute_counts(tx, next, batch_size)?;

    debug!(
        version = %version,
        next = next.number,
        dropped = transient.len(),
        merged = readd_records.len(),
        moved_added = added.len(),
        moved_removed = removed.len(),
        "Squashed version into successor"
    );
    Ok(())
}

/// Take back every change `version` made: its add records are deleted and
/// its removals reopened.
pub fn retract(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    batch_size: usize,
) -> Result<()> {
    let repository_id = version.repository_id;

    let added = tx.memberships(repository_id, &MembershipFilter::added_by(version.id))?;
    for batch in batches(&record_ids(&added), batch_size) {
        tx.delete_memberships(batch)?;
    }
    let removed = tx.memberships(repository_id, &MembershipFilter::removed_by(version.id))?;
    for batch in batches(&record_ids(&removed), batch_size) {
        tx.set_version_removed(batch, None)?;
    }
    Ok(())
}
