//! Retention & protection tests
//!
//! - Retention limit applied on seal and on demand
//! - Versions reachable through distributions and publications survive
//! - Cache invalidation of served base paths

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use contentrepo_storage::{
    CacheInvalidator, ContentId, ContentUnit, Distribution, ErrorKind, InMemoryVersionStore,
    Repository, RepositoryService, FILE_KIND,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn service() -> RepositoryService {
    RepositoryService::new(InMemoryVersionStore::new())
}

/// Create a repository with versions 1..=n, each adding one new unit
async fn repository_with_versions(
    service: &RepositoryService,
    n: usize,
) -> (Repository, Vec<ContentId>) {
    let repo = service.create_repository("files", FILE_KIND).await.unwrap();
    let units: Vec<ContentUnit> = (0..n)
        .map(|i| ContentUnit::new(FILE_KIND).with_natural_key(format!("file-{}.txt", i)))
        .collect();
    service.register_content(&units).await.unwrap();

    for unit in &units {
        let mut handle = service.new_version(repo.id, None).await.unwrap();
        handle.add_content(&[unit.id].into()).await.unwrap();
        handle.finalize().await.unwrap().unwrap();
    }
    let repo = service.get_repository(repo.id).await.unwrap();
    (repo, units.into_iter().map(|u| u.id).collect())
}

async fn numbers(service: &RepositoryService, repo: &Repository) -> Vec<u32> {
    service
        .list_versions(repo.id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.number)
        .collect()
}

/// Deleting `number` must fail as protected and leave the repository as it was
async fn assert_delete_refused(service: &RepositoryService, repo: &Repository, number: u32) {
    let ledger = service.ledger(repo.id).await.unwrap();
    let versions = numbers(service, repo).await;
    let content = service.content(repo.id, number).await.unwrap();

    let err = service.delete_version(repo.id, number).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ProtectedVersion);
    assert_eq!(err.version_number, Some(number));

    assert_eq!(service.ledger(repo.id).await.unwrap(), ledger);
    assert_eq!(numbers(service, repo).await, versions);
    assert_eq!(service.content(repo.id, number).await.unwrap(), content);
    assert!(service.verify_repository(repo.id).await.unwrap().is_consistent());
}

async fn protected_numbers(service: &RepositoryService, repo: &Repository) -> Vec<u32> {
    service
        .protected_versions(repo.id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.number)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Retention
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_retention_deletes_oldest_first() {
    let service = service();
    let (repo, ids) = repository_with_versions(&service, 5).await;
    service.delete_version(repo.id, 0).await.unwrap();
    assert_eq!(numbers(&service, &repo).await, vec![1, 2, 3, 4, 5]);

    let deleted = service.set_retention(repo.id, Some(2)).await.unwrap();
    let deleted: Vec<u32> = deleted.iter().map(|v| v.number).collect();
    assert_eq!(deleted, vec![1, 2, 3]);
    assert_eq!(numbers(&service, &repo).await, vec![4, 5]);

    let all: BTreeSet<ContentId> = ids.iter().copied().collect();
    let but_last: BTreeSet<ContentId> = ids[..4].iter().copied().collect();
    assert_eq!(service.content(repo.id, 5).await.unwrap(), all);
    assert_eq!(service.content(repo.id, 4).await.unwrap(), but_last);
    assert_eq!(service.added(repo.id, 4, None).await.unwrap(), but_last);
    assert!(service.verify_repository(repo.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_retention_applied_on_seal() {
    let service = service();
    let mut repo = Repository::new("files", FILE_KIND);
    repo.retain_repo_versions = Some(2);
    let repo = service.create_repository_with(repo).await.unwrap();

    let units: Vec<ContentUnit> = (0..3).map(|_| ContentUnit::new(FILE_KIND)).collect();
    service.register_content(&units).await.unwrap();
    for unit in &units {
        let mut handle = service.new_version(repo.id, None).await.unwrap();
        handle.add_content(&[unit.id].into()).await.unwrap();
        handle.finalize().await.unwrap().unwrap();
    }

    assert_eq!(numbers(&service, &repo).await, vec![2, 3]);
    assert_eq!(service.content(repo.id, 3).await.unwrap().len(), 3);
    assert_eq!(service.content(repo.id, 2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unlimited_retention_keeps_everything() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;

    assert!(service.cleanup_old_versions(repo.id).await.unwrap().is_empty());
    assert_eq!(numbers(&service, &repo).await, vec![0, 1, 2, 3]);

    // Clearing the limit never deletes
    assert!(service.set_retention(repo.id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cleanup_refused_while_version_open() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;
    let _handle = service.new_version(repo.id, None).await.unwrap();

    let err = service.set_retention(repo.id, Some(1)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConcurrentMutation);
    assert_eq!(numbers(&service, &repo).await, vec![0, 1, 2, 3, 4]);
}

// ═══════════════════════════════════════════════════════════════════════
// Protection
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_version_served_directly_is_protected() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;
    let v1 = service.get_version(repo.id, 1).await.unwrap();
    service
        .create_distribution(Distribution::new("pinned", "files/pinned").for_version(v1.id))
        .await
        .unwrap();

    assert_eq!(protected_numbers(&service, &repo).await, vec![1]);
    assert_delete_refused(&service, &repo, 1).await;

    service.set_retention(repo.id, Some(1)).await.unwrap();
    assert_eq!(numbers(&service, &repo).await, vec![1, 3]);
}

#[tokio::test]
async fn test_version_behind_served_publication_is_protected() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;
    let publication = service.create_publication(repo.id, 2, false).await.unwrap();
    let distribution = service
        .create_distribution(
            Distribution::new("published", "files/published").for_publication(publication.id),
        )
        .await
        .unwrap();

    assert_eq!(protected_numbers(&service, &repo).await, vec![2]);
    assert_delete_refused(&service, &repo, 2).await;

    service.delete_distribution(distribution.id).await.unwrap();
    assert!(protected_numbers(&service, &repo).await.is_empty());
    service.delete_version(repo.id, 2).await.unwrap();
}

#[tokio::test]
async fn test_checkpoint_publications_protected_by_checkpoint_distribution() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;
    service.create_publication(repo.id, 1, true).await.unwrap();
    service.create_publication(repo.id, 2, false).await.unwrap();

    assert!(protected_numbers(&service, &repo).await.is_empty());

    service
        .create_distribution(
            Distribution::new("history", "files/history")
                .for_repository(repo.id)
                .checkpoint(),
        )
        .await
        .unwrap();
    assert_eq!(protected_numbers(&service, &repo).await, vec![1]);
}

#[tokio::test]
async fn test_repository_distribution_protects_latest() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;
    service
        .create_distribution(Distribution::new("live", "files/live").for_repository(repo.id))
        .await
        .unwrap();

    assert_eq!(protected_numbers(&service, &repo).await, vec![3]);
    assert_delete_refused(&service, &repo, 3).await;
}

#[tokio::test]
async fn test_publication_distribution_protects_latest_published() {
    let service = service();
    let (repo, _) = repository_with_versions(&service, 3).await;
    service.create_publication(repo.id, 1, false).await.unwrap();
    service.create_publication(repo.id, 2, false).await.unwrap();
    service
        .create_distribution(
            Distribution::new("live", "files/live")
                .for_repository(repo.id)
                .serving_publications(),
        )
        .await
        .unwrap();

    assert_eq!(protected_numbers(&service, &repo).await, vec![2]);

    let deleted = service.set_retention(repo.id, Some(1)).await.unwrap();
    let deleted: Vec<u32> = deleted.iter().map(|v| v.number).collect();
    assert_eq!(deleted, vec![0, 1]);
    assert_eq!(numbers(&service, &repo).await, vec![2, 3]);
}

// ═══════════════════════════════════════════════════════════════════════
// Cache invalidation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct RecordingCache {
    invalidated: Mutex<Vec<String>>,
}

#[async_trait]
impl CacheInvalidator for RecordingCache {
    async fn invalidate(&self, base_paths: &[String]) {
        self.invalidated.lock().extend_from_slice(base_paths);
    }
}

#[tokio::test]
async fn test_served_paths_invalidated_on_change() {
    let cache = Arc::new(RecordingCache::default());
    let service = service().with_cache(cache.clone());
    let (repo, _) = repository_with_versions(&service, 2).await;
    let v1 = service.get_version(repo.id, 1).await.unwrap();
    service
        .create_distribution(Distribution::new("live", "files/live").for_repository(repo.id))
        .await
        .unwrap();
    service
        .create_distribution(Distribution::new("pinned", "files/v1").for_version(v1.id))
        .await
        .unwrap();
    cache.invalidated.lock().clear();

    let unit = ContentUnit::new(FILE_KIND);
    service.register_content(&[unit.clone()]).await.unwrap();
    let mut handle = service.new_version(repo.id, None).await.unwrap();
    handle.add_content(&[unit.id].into()).await.unwrap();
    handle.finalize().await.unwrap().unwrap();
    // Once when opened, once when sealed
    assert_eq!(
        *cache.invalidated.lock(),
        vec!["files/live".to_string(), "files/live".to_string()]
    );

    cache.invalidated.lock().clear();
    service.delete_repository(repo.id).await.unwrap();
    let mut paths = cache.invalidated.lock().clone();
    paths.sort();
    assert_eq!(paths, vec!["files/live".to_string(), "files/v1".to_string()]);
}
