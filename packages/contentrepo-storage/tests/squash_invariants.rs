//! Property-based tests for ledger compaction
//!
//! Invariants that hold for any history:
//! - Deleting a version leaves every other version's content unchanged
//! - No ledger record names a deleted version
//! - Within one version the ledger stays normalized, whatever the
//!   order of adds and removes

use std::collections::{BTreeMap, BTreeSet};

use contentrepo_storage::domain::models::MembershipFilter;
use contentrepo_storage::domain::{LedgerTx, VersionStore};
use contentrepo_storage::versioning::{self, materializer, Finalized, VersionEditor};
use contentrepo_storage::{
    ContentId, ContentUnit, InMemoryVersionStore, Repository, SimpleKind, FILE_KIND,
};
use proptest::prelude::*;
use proptest::sample::Index;

const POOL: usize = 6;
const BATCH: usize = 2;

fn subset(pool: &[ContentId], mask: u8) -> BTreeSet<ContentId> {
    pool.iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, id)| *id)
        .collect()
}

/// Repository whose version `i + 1` holds `subset(masks[i])`; versions
/// without a net change are discarded and burn no number.
fn build_history(
    store: &InMemoryVersionStore,
    masks: &[u8],
) -> (Repository, Vec<ContentId>, BTreeMap<u32, BTreeSet<ContentId>>) {
    let kind = SimpleKind::file();
    let units: Vec<ContentUnit> = (0..POOL).map(|_| ContentUnit::new(FILE_KIND)).collect();
    let pool: Vec<ContentId> = units.iter().map(|u| u.id).collect();

    let mut repository = Repository::new("history", FILE_KIND);
    let mut expected = BTreeMap::new();
    {
        let mut tx = store.begin().unwrap();
        tx.insert_content(&units).unwrap();
        tx.insert_repository(&repository).unwrap();
        versioning::create_initial_version(tx.as_mut(), &mut repository).unwrap();
        tx.commit().unwrap();
    }
    expected.insert(0, BTreeSet::new());

    for mask in masks {
        let target = subset(&pool, *mask);
        let mut tx = store.begin().unwrap();
        let mut version =
            versioning::open_version(tx.as_mut(), &repository, &kind, None, false, BATCH).unwrap();
        VersionEditor::new(tx.as_mut(), &repository, &mut version, BATCH)
            .set_content(&target)
            .unwrap();
        let outcome =
            versioning::seal_version(tx.as_mut(), &mut repository, &mut version, &kind, BATCH)
                .unwrap();
        tx.commit().unwrap();
        if let Finalized::Sealed(sealed) = outcome {
            expected.insert(sealed.number, target);
        }
    }
    (repository, pool, expected)
}

fn assert_history(
    tx: &mut dyn LedgerTx,
    repository: &Repository,
    expected: &BTreeMap<u32, BTreeSet<ContentId>>,
) -> Result<(), TestCaseError> {
    let versions = tx.list_versions(repository.id).unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.number).collect();
    let expected_numbers: Vec<u32> = expected.keys().copied().collect();
    prop_assert_eq!(numbers, expected_numbers);

    for version in &versions {
        let derived = materializer::derive_from_ledger(tx, version).unwrap();
        prop_assert_eq!(&derived, &expected[&version.number]);
        prop_assert_eq!(version.content_ids.as_ref(), Some(&derived));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_delete_preserves_other_versions(
        masks in prop::collection::vec(0u8..64, 1..8),
        picks in prop::collection::vec(any::<Index>(), 1..5),
    ) {
        let store = InMemoryVersionStore::new();
        let (repository, _pool, mut expected) = build_history(&store, &masks);

        for pick in picks {
            if expected.len() <= 1 {
                break;
            }
            let number = *pick.get(&expected.keys().copied().collect::<Vec<_>>());

            let mut tx = store.begin().unwrap();
            let version = tx.version_by_number(repository.id, number).unwrap().unwrap();
            versioning::delete_version(tx.as_mut(), &version, BATCH).unwrap();
            tx.commit().unwrap();
            expected.remove(&number);

            let mut tx = store.begin().unwrap();
            prop_assert_eq!(tx.count_references(version.id).unwrap(), 0);
            assert_history(tx.as_mut(), &repository, &expected)?;
        }
    }

    #[test]
    fn prop_history_matches_requested_content(masks in prop::collection::vec(0u8..64, 1..10)) {
        let store = InMemoryVersionStore::new();
        let (repository, _pool, expected) = build_history(&store, &masks);
        let mut tx = store.begin().unwrap();
        assert_history(tx.as_mut(), &repository, &expected)?;
    }

    #[test]
    fn prop_mutations_keep_ledger_normalized(
        ops in prop::collection::vec((any::<bool>(), 0u8..64), 1..12),
        base in 0u8..64,
    ) {
        let store = InMemoryVersionStore::new();
        let (repository, pool, _) = build_history(&store, &[base]);
        let kind = SimpleKind::file();

        let mut tx = store.begin().unwrap();
        let mut version =
            versioning::open_version(tx.as_mut(), &repository, &kind, None, false, BATCH).unwrap();
        let mut model = subset(&pool, base);
        {
            let mut editor = VersionEditor::new(tx.as_mut(), &repository, &mut version, BATCH);
            for (add, mask) in &ops {
                let ids = subset(&pool, *mask);
                if *add {
                    editor.add_content(&ids).unwrap();
                    model.extend(ids);
                } else {
                    editor.remove_content(&ids).unwrap();
                    model.retain(|id| !ids.contains(id));
                }
            }
        }

        prop_assert_eq!(materializer::derive_from_ledger(tx.as_mut(), &version).unwrap(), model.clone());
        prop_assert_eq!(version.content_ids.clone(), Some(model));

        let records = tx.memberships(repository.id, &MembershipFilter::default()).unwrap();
        let mut open_per_content = BTreeMap::new();
        for record in &records {
            prop_assert!(record.version_removed != Some(record.version_added));
            if record.version_removed.is_none() {
                *open_per_content.entry(record.content_id).or_insert(0) += 1;
            }
        }
        prop_assert!(open_per_content.values().all(|n| *n == 1));

        let added = materializer::added(tx.as_mut(), &version, None).unwrap();
        let removed = materializer::removed(tx.as_mut(), &version, None).unwrap();
        prop_assert!(added.is_disjoint(&removed));
    }
}
