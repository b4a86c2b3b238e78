//! Unit tests for the JSON player registry.

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;
use time::macros::datetime;

use super::*;
use crate::error::Coded;

#[fixture]
fn dir() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

#[rstest]
fn add_is_idempotent_per_xuid(dir: TempDir) {
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    assert_eq!(
        registry.add("Steve", "2535").expect("add").state,
        PlayerState::Added
    );
    assert_eq!(
        registry.add("Steve", "2535").expect("add again").state,
        PlayerState::AlreadyExists
    );
    assert_eq!(registry.known().expect("known").len(), 1);
    assert_eq!(
        registry.add("", "1").expect_err("name required").code(),
        1521
    );
}

#[rstest]
fn replayed_sessions_accumulate_play_time_once(dir: TempDir) {
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    let joined = datetime!(2024-03-01 10:00:00);
    let left = datetime!(2024-03-01 10:30:00);

    for _ in 0..2 {
        registry
            .session_started("Steve", Some("2535"), joined)
            .expect("start");
        registry.session_ended("Steve", left).expect("end");
    }

    let players = registry.known().expect("known");
    let steve = players.first().expect("steve");
    assert_eq!(steve.playtime, 1800);
    assert_eq!(steve.last_seen.as_deref(), Some("2024-03-01 10:30:00"));
    assert_eq!(
        registry.stop_playtime("Steve", left).expect("replay").state,
        PlayerState::UpToDate
    );
}

#[rstest]
fn unknown_player_without_xuid_is_ignored(dir: TempDir) {
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    let update = registry
        .session_started("Alex", None, datetime!(2024-03-01 10:00:00))
        .expect("ignored");
    assert_eq!(update.state, PlayerState::UpToDate);
    assert_eq!(
        registry
            .start_playtime("Alex", datetime!(2024-03-01 10:00:00))
            .expect_err("unknown")
            .code(),
        1535
    );
}

#[rstest]
fn corrupt_registry_reports_parse_error(dir: TempDir) {
    fs::write(dir.path().join(PLAYER_FILE), "{not json").expect("write");
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    assert_eq!(registry.known().expect_err("corrupt").code(), 1512);
}

#[rstest]
fn permission_lifecycle(dir: TempDir) {
    let instance = dir.path().join("s1");
    fs::create_dir(&instance).expect("instance");
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    registry.add("Steve", "2535").expect("add");

    let granted = registry
        .update_permission(&instance, "Steve", Some(Permission::Member))
        .expect("grant");
    assert_eq!(granted.state, PlayerState::Added);
    assert_eq!(granted.server_name, "s1");

    let same = registry
        .update_permission(&instance, "Steve", Some(Permission::Member))
        .expect("same");
    assert_eq!(same.state, PlayerState::UpToDate);

    let promoted = registry
        .update_permission(&instance, "Steve", Some(Permission::Operator))
        .expect("promote");
    assert_eq!(promoted.state, PlayerState::Updated);
    let written = fs::read_to_string(instance.join(PERMISSIONS_FILE)).expect("read");
    assert!(written.contains("\"operator\""));

    let removed = registry
        .update_permission(&instance, "Steve", None)
        .expect("remove");
    assert_eq!(removed.state, PlayerState::Removed);
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(instance.join(PERMISSIONS_FILE)).expect("read"))
            .expect("json");
    assert!(entries.is_empty());
}

#[rstest]
fn permission_requires_known_player_and_instance(dir: TempDir) {
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    let error = registry
        .update_permission(&dir.path().join("missing"), "Steve", Some(Permission::Visitor))
        .expect_err("missing instance");
    assert_eq!(error.code(), 1554);

    fs::create_dir(dir.path().join("s1")).expect("instance");
    let error = registry
        .update_permission(&dir.path().join("s1"), "Steve", Some(Permission::Visitor))
        .expect_err("unknown player");
    assert_eq!(error.code(), 1535);
}

#[test]
fn permission_parses_from_lowercase() {
    assert_eq!("operator".parse::<Permission>().ok(), Some(Permission::Operator));
    assert!("admin".parse::<Permission>().is_err());
}
