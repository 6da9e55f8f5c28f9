//! Per content-type count summaries (added / present / removed)

use std::collections::{BTreeMap, BTreeSet};

use super::materializer;
use crate::domain::{ContentCount, ContentId, CountType, LedgerTx, RepositoryVersion};
use crate::Result;

/// Recompute and store the count summary of `version`.
pub fn compute_counts(
    tx: &mut dyn LedgerTx,
    version: &RepositoryVersion,
    batch_size: usize,
) -> Result<Vec<ContentCount>> {
    let mut counts = Vec::new();
    for count_type in CountType::ALL {
        let ids = match count_type {
            CountType::Added => materializer::added(tx, version, None)?,
            CountType::Present => materializer::content_ids(tx, version)?,
            CountType::Removed => materializer::removed(tx, version, None)?,
        };
        for (content_type, count) in count_by_type(tx, &ids, batch_size)? {
            counts.push(ContentCount {
                version_id: version.id,
                count_type,
                content_type,
                count,
            });
        }
    }
    tx.replace_counts(version.id, &counts)?;
    Ok(counts)
}

/// Content types present in `ids`
pub fn content_types(
    tx: &mut dyn LedgerTx,
    ids: &BTreeSet<ContentId>,
    batch_size: usize,
) -> Result<BTreeSet<String>> {
    Ok(count_by_type(tx, ids, batch_size)?.into_keys().collect())
}

fn count_by_type(
    tx: &mut dyn LedgerTx,
    ids: &BTreeSet<ContentId>,
    batch_size: usize,
) -> Result<BTreeMap<String, u64>> {
    let mut by_type = BTreeMap::new();
    for unit in materializer::content_units(tx, ids, batch_size)? {
        *by_type.entry(unit.content_type).or_insert(0) += 1;
    }
    Ok(by_type)
}
