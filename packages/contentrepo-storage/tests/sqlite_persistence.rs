//! SQLite store tests
//!
//! Same lifecycle as the in-memory store, plus what only a file-backed
//! store can show: state surviving a reopen and rollback of uncommitted work.

#![cfg(feature = "sqlite")]

use std::collections::BTreeSet;
use std::io::Write;

use contentrepo_storage::config::MAX_BATCH_SIZE;
use contentrepo_storage::domain::{LedgerTx, VersionStore};
use contentrepo_storage::{
    ContentId, ContentUnit, ErrorKind, Repository, RepositoryService, SqliteVersionStore,
    StoreConfig, DEFAULT_DOMAIN, FILE_KIND,
};
use pretty_assertions::assert_eq;
use tempfile::{NamedTempFile, TempDir};

fn open(dir: &TempDir) -> RepositoryService {
    let store = SqliteVersionStore::new(dir.path().join("store.db")).unwrap();
    RepositoryService::new(store)
}

async fn register(service: &RepositoryService, content_type: &str, n: usize) -> Vec<ContentId> {
    let units: Vec<ContentUnit> = (0..n)
        .map(|i| ContentUnit::new(content_type).with_natural_key(format!("pkg-{}", i)))
        .collect();
    service.register_content(&units).await.unwrap();
    units.into_iter().map(|u| u.id).collect()
}

fn set(ids: &[ContentId]) -> BTreeSet<ContentId> {
    ids.iter().copied().collect()
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let ids;
    let repo;
    {
        let service = open(&dir);
        repo = service.create_repository("files", FILE_KIND).await.unwrap();
        ids = register(&service, FILE_KIND, 3).await;

        let mut v1 = service.new_version(repo.id, None).await.unwrap();
        v1.add_content(&set(&ids)).await.unwrap();
        v1.finalize().await.unwrap();

        let mut v2 = service.new_version(repo.id, None).await.unwrap();
        v2.remove_content(&set(&ids[..1])).await.unwrap();
        v2.finalize().await.unwrap();
    }

    let service = open(&dir);
    let reopened = service.repository_by_name("files", DEFAULT_DOMAIN).await.unwrap();
    assert_eq!(reopened.id, repo.id);
    assert_eq!(reopened.next_version, 3);
    assert_eq!(service.content(repo.id, 1).await.unwrap(), set(&ids));
    assert_eq!(service.content(repo.id, 2).await.unwrap(), set(&ids[1..]));
    assert_eq!(service.removed(repo.id, 2, None).await.unwrap(), set(&ids[..1]));

    let units = service.content_units(&set(&ids)).await.unwrap();
    let mut keys: Vec<String> = units.into_iter().filter_map(|u| u.natural_key).collect();
    keys.sort();
    assert_eq!(keys, vec!["pkg-0", "pkg-1", "pkg-2"]);
    assert!(service.verify_repository(repo.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_delete_middle_version_squashes() {
    let dir = TempDir::new().unwrap();
    let service = open(&dir);
    let repo = service.create_repository("files", FILE_KIND).await.unwrap();
    let ids = register(&service, FILE_KIND, 2).await;
    let (a, b) = (ids[0], ids[1]);

    for (add, remove) in [(vec![a, b], vec![]), (vec![], vec![a]), (vec![a], vec![])] {
        let mut handle = service.new_version(repo.id, None).await.unwrap();
        handle.add_content(&set(&add)).await.unwrap();
        handle.remove_content(&set(&remove)).await.unwrap();
        handle.finalize().await.unwrap().unwrap();
    }

    let v2 = service.get_version(repo.id, 2).await.unwrap();
    service.delete_version(repo.id, 2).await.unwrap();

    assert_eq!(service.content(repo.id, 1).await.unwrap(), set(&[a, b]));
    assert_eq!(service.content(repo.id, 3).await.unwrap(), set(&[a, b]));
    let ledger = service.ledger(repo.id).await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(ledger
        .iter()
        .all(|r| r.version_added != v2.id && r.version_removed != Some(v2.id)));
}

#[tokio::test]
async fn test_failed_seal_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let service = open(&dir);
    let repo = service.create_repository("files", FILE_KIND).await.unwrap();
    let rpms = register(&service, "rpm.package", 2).await;

    let mut handle = service.new_version(repo.id, None).await.unwrap();
    handle.add_content(&set(&rpms)).await.unwrap();
    let err = handle.finalize().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedContentType);
    assert_eq!(err.version_number, Some(1));

    let service = open(&dir);
    assert_eq!(service.get_repository(repo.id).await.unwrap().next_version, 1);
    assert_eq!(service.list_versions(repo.id).await.unwrap().len(), 1);
    assert!(service.ledger(repo.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retention_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let service = open(&dir);
    let repo = service.create_repository("files", FILE_KIND).await.unwrap();
    let ids = register(&service, FILE_KIND, 4).await;
    for id in &ids {
        let mut handle = service.new_version(repo.id, None).await.unwrap();
        handle.add_content(&set(&[*id])).await.unwrap();
        handle.finalize().await.unwrap();
    }

    let deleted = service.set_retention(repo.id, Some(2)).await.unwrap();
    let deleted: Vec<u32> = deleted.iter().map(|v| v.number).collect();
    assert_eq!(deleted, vec![0, 1, 2]);

    let service = open(&dir);
    let numbers: Vec<u32> = service
        .list_versions(repo.id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.number)
        .collect();
    assert_eq!(numbers, vec![3, 4]);
    assert_eq!(service.content(repo.id, 4).await.unwrap(), set(&ids));
    assert_eq!(service.added(repo.id, 3, None).await.unwrap(), set(&ids[..3]));
}

#[tokio::test]
async fn test_largest_batch_fits_sqlite_limits() {
    let service = RepositoryService::new(SqliteVersionStore::in_memory().unwrap())
        .with_batch_size(usize::MAX);
    assert_eq!(service.batch_size(), MAX_BATCH_SIZE);

    let repo = service.create_repository("bulk", FILE_KIND).await.unwrap();
    let ids = set(&register(&service, FILE_KIND, MAX_BATCH_SIZE).await);

    let mut v1 = service.new_version(repo.id, None).await.unwrap();
    v1.add_content(&ids).await.unwrap();
    v1.finalize().await.unwrap().unwrap();

    let mut v2 = service.new_version(repo.id, None).await.unwrap();
    v2.remove_content(&ids).await.unwrap();
    v2.add_content(&ids).await.unwrap();
    v2.remove_content(&ids).await.unwrap();
    v2.finalize().await.unwrap().unwrap();

    service.delete_version(repo.id, 1).await.unwrap();
    assert_eq!(service.added(repo.id, 2, None).await.unwrap(), BTreeSet::new());
    assert!(service.content(repo.id, 2).await.unwrap().is_empty());
    assert!(service.ledger(repo.id).await.unwrap().is_empty());
}

#[test]
fn test_uncommitted_transaction_rolls_back() {
    let dir = TempDir::new().unwrap();
    let store = SqliteVersionStore::new(dir.path().join("store.db")).unwrap();
    let repository = Repository::new("files", FILE_KIND);

    {
        let mut tx = store.begin().unwrap();
        tx.insert_repository(&repository).unwrap();
        assert!(tx.get_repository(repository.id).unwrap().is_some());
    }

    let mut tx = store.begin().unwrap();
    assert!(tx.get_repository(repository.id).unwrap().is_none());
    tx.insert_repository(&repository).unwrap();
    tx.commit().unwrap();

    let store = SqliteVersionStore::new(dir.path().join("store.db")).unwrap();
    let mut tx = store.begin().unwrap();
    assert_eq!(tx.list_repositories().unwrap().len(), 1);
}

#[tokio::test]
async fn test_service_from_yaml_config() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("configured.db");
    let yaml = format!(
        r#"
version: 1
database:
  path: {}
  busy_timeout_ms: 1000
batch_size: 2
kinds:
  - name: rpm.rpm
    content_types: [rpm.package]
"#,
        db_path.display()
    );
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = StoreConfig::from_yaml(file.path()).unwrap();
    let service = RepositoryService::from_config(&config).unwrap();
    assert_eq!(service.batch_size(), 2);

    let repo = service.create_repository("rpms", "rpm.rpm").await.unwrap();
    let ids = register(&service, "rpm.package", 5).await;
    let mut handle = service.new_version(repo.id, None).await.unwrap();
    handle.add_content(&set(&ids)).await.unwrap();
    handle.finalize().await.unwrap().unwrap();

    drop(service);
    assert!(db_path.exists());
    let service = RepositoryService::new(SqliteVersionStore::new(&db_path).unwrap());
    assert_eq!(service.content(repo.id, 1).await.unwrap(), set(&ids));
}
