//! Unit tests for `SessionRepo` persistence, versioning, and filtering.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_proxy::models::filter::{SessionFilter, SortField, SortOrder};
use agent_proxy::models::session::{ProcessInfo, RepositoryInfo, Session, SessionStatus};
use agent_proxy::persistence::session_repo::SessionRepo;
use agent_proxy::persistence::{db, SessionRepository};
use agent_proxy::AppError;

async fn repo() -> SessionRepo {
    let db = db::connect_memory().await.expect("db");
    SessionRepo::new(Arc::new(db))
}

fn session(user_id: &str, port: u16) -> Session {
    Session::new(user_id, port, BTreeMap::new(), BTreeMap::new(), None).expect("session")
}

fn tagged(user_id: &str, port: u16, tags: &[(&str, &str)]) -> Session {
    let tags = tags
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    Session::new(user_id, port, BTreeMap::new(), tags, None).expect("session")
}

#[tokio::test]
async fn save_and_find_round_trips_every_field() {
    let repo = repo().await;

    let mut env = BTreeMap::new();
    env.insert("RUST_LOG".to_owned(), "debug".to_owned());
    let mut tags = BTreeMap::new();
    tags.insert("team".to_owned(), "core".to_owned());
    let repository = RepositoryInfo::new("https://github.com/org/repo.git")
        .with_branch("main")
        .with_commit("abc1234");
    let mut original = Session::new("u1", 9001, env, tags, Some(repository)).expect("session");

    original = repo.save(&original).await.expect("save");
    original
        .activate(ProcessInfo::new(321, "agent-server"))
        .expect("activate");
    original.request_termination().expect("terminate");
    let updated = repo.update(&original).await.expect("update");

    let loaded = repo
        .find_by_id(&original.id)
        .await
        .expect("find")
        .expect("present");

    assert_eq!(loaded, updated);
    assert_eq!(loaded.status(), SessionStatus::Active);
    assert_eq!(loaded.process().map(|p| p.pid), Some(321));
    assert_eq!(loaded.environment.get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(loaded.tags.get("team").map(String::as_str), Some("core"));
    assert_eq!(
        loaded.repository.as_ref().and_then(|r| r.branch.as_deref()),
        Some("main")
    );
    assert!(loaded.termination_requested_at.is_some());
}

#[tokio::test]
async fn failed_session_keeps_reason() {
    let repo = repo().await;
    let mut s = repo.save(&session("u1", 9002)).await.unwrap();
    s.mark_failed("spawn failed: no such file").unwrap();
    repo.update(&s).await.unwrap();

    let loaded = repo.find_by_id(&s.id).await.unwrap().unwrap();
    assert_eq!(loaded.status(), SessionStatus::Failed);
    assert_eq!(loaded.failure_reason(), Some("spawn failed: no such file"));
}

#[tokio::test]
async fn find_by_id_returns_none_for_missing() {
    let repo = repo().await;
    assert!(repo.find_by_id("nonexistent").await.unwrap().is_none());
}

#[tokio::test]
async fn update_bumps_version() {
    let repo = repo().await;
    let mut s = repo.save(&session("u1", 9003)).await.unwrap();
    assert_eq!(s.version, 0);

    s.activate(ProcessInfo::new(5, "agent")).unwrap();
    let s = repo.update(&s).await.unwrap();
    assert_eq!(s.version, 1);

    let loaded = repo.find_by_id(&s.id).await.unwrap().unwrap();
    assert_eq!(loaded.version, 1);
}

#[tokio::test]
async fn stale_update_is_conflict() {
    let repo = repo().await;
    let saved = repo.save(&session("u1", 9004)).await.unwrap();

    let mut first = saved.clone();
    first.activate(ProcessInfo::new(5, "agent")).unwrap();
    repo.update(&first).await.expect("first writer wins");

    let mut second = saved;
    second.mark_failed("late writer").unwrap();
    let err = repo.update(&second).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    let stored = repo.find_by_id(&first.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), SessionStatus::Active);
}

#[tokio::test]
async fn update_of_missing_session_is_not_found() {
    let repo = repo().await;
    let err = repo.update(&session("u1", 9005)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn delete_removes_record() {
    let repo = repo().await;
    let s = repo.save(&session("u1", 9006)).await.unwrap();

    repo.delete(&s.id).await.expect("delete");
    assert!(repo.find_by_id(&s.id).await.unwrap().is_none());

    let err = repo.delete(&s.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn find_by_user_returns_only_that_users_sessions() {
    let repo = repo().await;
    repo.save(&session("u1", 9010)).await.unwrap();
    repo.save(&session("u1", 9011)).await.unwrap();
    repo.save(&session("u2", 9012)).await.unwrap();

    let mine = repo.find_by_user_id("u1").await.unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|s| s.user_id == "u1"));
    assert!(repo.find_by_user_id("u9").await.unwrap().is_empty());
}

#[tokio::test]
async fn filter_by_status_and_user() {
    let repo = repo().await;
    let mut a = repo.save(&session("u1", 9020)).await.unwrap();
    a.activate(ProcessInfo::new(1, "agent")).unwrap();
    repo.update(&a).await.unwrap();

    let mut b = repo.save(&session("u1", 9021)).await.unwrap();
    b.mark_failed("boom").unwrap();
    repo.update(&b).await.unwrap();

    repo.save(&session("u2", 9022)).await.unwrap();

    let (live, total) = repo
        .find_with_filter(&SessionFilter::non_terminal())
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert!(live.iter().all(|s| !s.is_terminal()));

    let (mine, total) = repo
        .find_with_filter(&SessionFilter::non_terminal().for_user("u1"))
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(mine[0].port, 9020);

    let (failed, _) = repo
        .find_with_filter(&SessionFilter::default().with_status(SessionStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].port, 9021);
}

#[tokio::test]
async fn filter_by_tags_requires_every_tag() {
    let repo = repo().await;
    repo.save(&tagged("u1", 9030, &[("team", "core"), ("env", "dev")]))
        .await
        .unwrap();
    repo.save(&tagged("u1", 9031, &[("team", "core"), ("env", "prod")]))
        .await
        .unwrap();
    repo.save(&tagged("u1", 9032, &[("team", "web")])).await.unwrap();

    let (core, _) = repo
        .find_with_filter(&SessionFilter::default().with_tag("team", "core"))
        .await
        .unwrap();
    assert_eq!(core.len(), 2);

    let (core_dev, total) = repo
        .find_with_filter(
            &SessionFilter::default()
                .with_tag("team", "core")
                .with_tag("env", "dev"),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(core_dev[0].port, 9030);
}

#[tokio::test]
async fn pagination_reports_total_across_pages() {
    let repo = repo().await;
    for port in 9040..9045 {
        repo.save(&session("u1", port)).await.unwrap();
    }

    let filter = SessionFilter::default()
        .sorted(SortField::Port, SortOrder::Asc)
        .page(2, 1);
    let (page, total) = repo.find_with_filter(&filter).await.unwrap();

    assert_eq!(total, 5);
    let ports: Vec<u16> = page.iter().map(|s| s.port).collect();
    assert_eq!(ports, vec![9041, 9042]);
}

#[tokio::test]
async fn sort_descending_by_port() {
    let repo = repo().await;
    for port in [9052, 9050, 9051] {
        repo.save(&session("u1", port)).await.unwrap();
    }

    let (sessions, _) = repo
        .find_with_filter(&SessionFilter::default().sorted(SortField::Port, SortOrder::Desc))
        .await
        .unwrap();
    let ports: Vec<u16> = sessions.iter().map(|s| s.port).collect();
    assert_eq!(ports, vec![9052, 9051, 9050]);
}

#[tokio::test]
async fn offset_without_limit_skips_rows() {
    let repo = repo().await;
    for port in 9060..9063 {
        repo.save(&session("u1", port)).await.unwrap();
    }

    let filter = SessionFilter {
        offset: 2,
        ..SessionFilter::default().sorted(SortField::Port, SortOrder::Asc)
    };
    let (sessions, total) = repo.find_with_filter(&filter).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].port, 9062);
}

#[tokio::test]
async fn file_backed_database_persists_across_connections() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("sessions.db");
    let path = path.to_string_lossy().into_owned();

    let id = {
        let pool = db::connect(&path).await.expect("connect");
        let repo = SessionRepo::new(Arc::new(pool.clone()));
        let saved = repo.save(&session("u1", 9070)).await.unwrap();
        pool.close().await;
        saved.id
    };

    let pool = db::connect(&path).await.expect("reconnect");
    let repo = SessionRepo::new(Arc::new(pool));
    assert!(repo.find_by_id(&id).await.unwrap().is_some());
}
