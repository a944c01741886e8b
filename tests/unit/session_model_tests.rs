//! Unit tests for the session state machine and repository validation.

use std::collections::BTreeMap;

use agent_proxy::models::session::{
    ProcessInfo, RepositoryInfo, Session, SessionState, SessionStatus,
};
use agent_proxy::AppError;

fn starting_session() -> Session {
    Session::new("u1", 9001, BTreeMap::new(), BTreeMap::new(), None).expect("valid session")
}

fn active_session() -> Session {
    let mut session = starting_session();
    session
        .activate(ProcessInfo::new(4242, "agent-server"))
        .expect("activate");
    session
}

#[test]
fn new_session_starts_without_process() {
    let session = starting_session();

    assert_eq!(session.status(), SessionStatus::Starting);
    assert!(session.process().is_none());
    assert!(session.failure_reason().is_none());
    assert!(session.can_be_terminated());
    assert!(!session.is_terminating());
    assert_eq!(session.version, 0);
    assert!(!session.id.is_empty());
}

#[test]
fn new_session_rejects_port_zero() {
    let err = Session::new("u1", 0, BTreeMap::new(), BTreeMap::new(), None).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn new_session_rejects_blank_owner() {
    let err = Session::new(" ", 9001, BTreeMap::new(), BTreeMap::new(), None).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn new_session_rejects_invalid_repository() {
    let repo = RepositoryInfo::new("ftp://example.com/repo.git");
    let err = Session::new("u1", 9001, BTreeMap::new(), BTreeMap::new(), Some(repo)).unwrap_err();
    assert!(err.to_string().contains("unsupported repository url"));
}

#[test]
fn activate_attaches_process_handle() {
    let session = active_session();

    assert!(session.is_active());
    assert_eq!(session.process().map(|p| p.pid), Some(4242));
}

#[test]
fn activate_rejects_zero_pid() {
    let mut session = starting_session();
    let err = session.activate(ProcessInfo::new(0, "agent")).unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(session.is_starting(), "failed activation must not change state");
}

#[test]
fn attach_then_promote_reaches_active() {
    let mut session = starting_session();
    session
        .attach_process(ProcessInfo::new(77, "agent"))
        .expect("attach");
    assert!(session.is_starting());
    assert_eq!(session.process().map(|p| p.pid), Some(77));

    session.promote().expect("promote");
    assert!(session.is_active());
    assert_eq!(session.process().map(|p| p.pid), Some(77));
}

#[test]
fn attach_twice_is_invalid_state() {
    let mut session = starting_session();
    session.attach_process(ProcessInfo::new(77, "agent")).expect("attach");

    let err = session.attach_process(ProcessInfo::new(78, "agent")).unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[test]
fn promote_without_handle_is_invalid_state() {
    let mut session = starting_session();
    let err = session.promote().unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[test]
fn stop_retains_last_process() {
    let mut session = active_session();
    session.mark_stopped().expect("stop");

    assert!(session.is_stopped());
    assert!(session.is_terminal());
    assert_eq!(session.process().map(|p| p.pid), Some(4242));
}

#[test]
fn failure_records_reason() {
    let mut session = active_session();
    session.mark_failed("process crashed").expect("fail");

    assert!(session.is_failed());
    assert_eq!(session.failure_reason(), Some("process crashed"));
    assert_eq!(session.process().map(|p| p.pid), Some(4242));
}

#[test]
fn empty_failure_reason_is_replaced() {
    let mut session = starting_session();
    session.mark_failed("").expect("fail");
    assert_eq!(session.failure_reason(), Some("unknown failure"));
}

#[test]
fn starting_may_fail_directly() {
    let mut session = starting_session();
    session.mark_failed("spawn failed").expect("fail");
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(session.process().is_none());
}

#[test]
fn terminal_sessions_reject_every_mutation() {
    let mut stopped = active_session();
    stopped.mark_stopped().expect("stop");
    let mut failed = active_session();
    failed.mark_failed("boom").expect("fail");

    for session in [&mut stopped, &mut failed] {
        let before = session.clone();
        assert!(!session.can_be_terminated());

        assert!(matches!(session.mark_stopped(), Err(AppError::InvalidState(_))));
        assert!(matches!(session.mark_failed("again"), Err(AppError::InvalidState(_))));
        assert!(matches!(session.request_termination(), Err(AppError::InvalidState(_))));
        assert!(matches!(
            session.activate(ProcessInfo::new(1, "agent")),
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(session.promote(), Err(AppError::InvalidState(_))));

        assert_eq!(*session, before, "rejected mutations must leave the session untouched");
    }
}

#[test]
fn invalid_state_message_names_status() {
    let mut session = active_session();
    session.mark_stopped().expect("stop");

    let err = session.mark_failed("late").unwrap_err();
    assert!(err.to_string().contains("from status stopped"), "got {err}");
}

#[test]
fn request_termination_marks_terminating() {
    let mut session = active_session();
    session.request_termination().expect("terminate");

    assert!(session.termination_requested_at.is_some());
    assert!(session.is_terminating());
    assert!(session.is_active());

    session.mark_stopped().expect("stop");
    assert!(!session.is_terminating());
}

#[test]
fn status_parse_round_trips_storage_form() {
    for status in [
        SessionStatus::Starting,
        SessionStatus::Active,
        SessionStatus::Stopped,
        SessionStatus::Failed,
    ] {
        assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
    }
    assert!(SessionStatus::parse("paused").is_err());
}

#[test]
fn only_stopped_and_failed_are_terminal() {
    assert!(!SessionStatus::Starting.is_terminal());
    assert!(!SessionStatus::Active.is_terminal());
    assert!(SessionStatus::Stopped.is_terminal());
    assert!(SessionStatus::Failed.is_terminal());
}

#[test]
fn state_serializes_with_status_tag() {
    let session = active_session();
    let json = serde_json::to_value(&session).expect("serialize");

    assert_eq!(json["status"], "active");
    assert_eq!(json["process"]["pid"], 4242);
}

#[test]
fn restore_rejects_failed_without_reason() {
    let session = starting_session();
    let err = Session::restore(
        session.id.clone(),
        session.user_id.clone(),
        session.port,
        BTreeMap::new(),
        BTreeMap::new(),
        None,
        SessionState::Failed {
            reason: "   ".into(),
            process: None,
        },
        None,
        session.created_at,
        session.updated_at,
        3,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn restore_rejects_active_record_without_live_pid() {
    let session = active_session();
    let process = session.process().cloned().expect("active process");
    let restore = |port: u16, pid: u32| {
        Session::restore(
            session.id.clone(),
            session.user_id.clone(),
            port,
            BTreeMap::new(),
            BTreeMap::new(),
            None,
            SessionState::Active {
                process: ProcessInfo {
                    pid,
                    ..process.clone()
                },
            },
            None,
            session.created_at,
            session.updated_at,
            session.version,
        )
    };

    let err = restore(session.port, 0).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    let err = restore(0, 4242).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");

    let restored = restore(session.port, 4242).expect("valid record");
    assert_eq!(restored, session);
}

#[test]
fn repository_accepts_common_url_forms() {
    for url in [
        "https://github.com/org/repo.git",
        "http://git.local/repo",
        "ssh://git@host/repo.git",
        "git@github.com:org/repo.git",
        "file:///srv/repos/demo",
    ] {
        RepositoryInfo::new(url).validate().expect(url);
    }
}

#[test]
fn repository_rejects_bad_branch_names() {
    for branch in ["", "-delete", "a..b", "has space", "tab\tname"] {
        let repo = RepositoryInfo::new("https://example.com/r.git").with_branch(branch);
        assert!(repo.validate().is_err(), "branch {branch:?} should be rejected");
    }
    RepositoryInfo::new("https://example.com/r.git")
        .with_branch("feature/login-form")
        .validate()
        .expect("valid branch");
}

#[test]
fn repository_commit_must_be_hex() {
    let base = RepositoryInfo::new("https://example.com/r.git");
    assert!(base.clone().with_commit("abc123").validate().is_err());
    assert!(base.clone().with_commit("zzzzzzz").validate().is_err());
    base.clone().with_commit("abc1234").validate().expect("short sha");
    base.with_commit("0123456789abcdef0123456789abcdef01234567")
        .validate()
        .expect("full sha");
}
