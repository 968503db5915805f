//! Version-guarded post updates: exactly one concurrent writer wins, the
//! loser gets a conflict and nothing is silently overwritten.

mod common;

use std::sync::Arc;

use common::{MockRepository, user_role};
use rsocial::repository::{Repository, StoreError};

#[tokio::test]
async fn concurrent_updates_from_the_same_version_have_exactly_one_winner() {
    let repo = Arc::new(MockRepository::new());
    repo.seed_user(1, "alice", user_role()).await;
    repo.seed_post(10, 1, "original").await;

    let a = {
        let repo = Arc::clone(&repo);
        tokio::spawn(async move { repo.update_post(10, "writer a", "content a", 0).await })
    };
    let b = {
        let repo = Arc::clone(&repo);
        tokio::spawn(async move { repo.update_post(10, "writer b", "content b", 0).await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Conflict)))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);

    // The winner bumped the version exactly once and its write stuck.
    let post = repo.get_post(10).await.unwrap().unwrap();
    assert_eq!(post.version, 1);
    assert!(post.title == "writer a" || post.title == "writer b");
}

#[tokio::test]
async fn stale_version_after_a_successful_update_is_a_conflict() {
    let repo = Arc::new(MockRepository::new());
    repo.seed_post(10, 1, "original").await;

    let new_version = repo.update_post(10, "fresh", "fresh", 0).await.unwrap();
    assert_eq!(new_version, 1);

    // Retrying with the already-consumed version must not apply.
    let stale = repo.update_post(10, "stale", "stale", 0).await;
    assert!(matches!(stale, Err(StoreError::Conflict)));

    let post = repo.get_post(10).await.unwrap().unwrap();
    assert_eq!(post.title, "fresh");
    assert_eq!(post.version, 1);

    // A re-fetch-and-retry with the current version succeeds.
    assert_eq!(repo.update_post(10, "retry", "retry", 1).await.unwrap(), 2);
}

#[tokio::test]
async fn updating_a_missing_post_is_a_conflict_like_a_stale_version() {
    let repo = MockRepository::new();
    let result = repo.update_post(999, "t", "c", 0).await;
    assert!(matches!(result, Err(StoreError::Conflict)));
}
