//! Unit tests for `UserRepo`.

use std::sync::Arc;

use agent_proxy::models::user::User;
use agent_proxy::persistence::user_repo::UserRepo;
use agent_proxy::persistence::{db, UserRepository};
use agent_proxy::AppError;

async fn repo() -> UserRepo {
    let db = db::connect_memory().await.expect("db");
    UserRepo::new(Arc::new(db))
}

#[tokio::test]
async fn save_and_find_round_trips() {
    let repo = repo().await;
    let user = User::new("u1", "Ada").with_admin(true);
    repo.save(&user).await.expect("save");

    let loaded = repo.find_by_id("u1").await.expect("find").expect("present");
    assert_eq!(loaded, user);
}

#[tokio::test]
async fn find_missing_returns_none() {
    let repo = repo().await;
    assert!(repo.find_by_id("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn save_overwrites_existing_user() {
    let repo = repo().await;
    repo.save(&User::new("u1", "Ada")).await.unwrap();
    repo.save(&User::new("u1", "Ada L.").with_active(false))
        .await
        .unwrap();

    let loaded = repo.get_by_id("u1").await.unwrap().unwrap();
    assert_eq!(loaded.display_name, "Ada L.");
    assert!(!loaded.is_active);
    assert_eq!(repo.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_persists_last_used() {
    let repo = repo().await;
    let mut user = repo.save(&User::new("u1", "Ada")).await.unwrap();
    user.touch_last_used();

    repo.update(&user).await.expect("update");

    let loaded = repo.get_by_id("u1").await.unwrap().unwrap();
    assert_eq!(loaded.last_used_at, user.last_used_at);
}

#[tokio::test]
async fn update_missing_user_is_not_found() {
    let repo = repo().await;
    let err = repo.update(&User::new("ghost", "Nobody")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_orders_by_id() {
    let repo = repo().await;
    for id in ["carol", "alice", "bob"] {
        repo.save(&User::new(id, id)).await.unwrap();
    }
    let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|u| u.id).collect();
    assert_eq!(ids, vec!["alice", "bob", "carol"]);
}
