//! Unit tests for log replay.

use std::fs;
use std::io::Cursor;

use rstest::{fixture, rstest};
use tempfile::TempDir;
use time::macros::datetime;

use super::*;
use crate::players::{JsonPlayerRegistry, NoopRegistry};

#[fixture]
fn dir() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

fn replay(text: &str) -> LogState {
    parse_reader(Cursor::new(text.as_bytes()), &NoopRegistry).expect("replay")
}

const TWO_RUNS: &str = "\
NO LOG FILE! - setting up server logging...
[2024-03-01 10:00:00:000 INFO] Starting Server
[2024-03-01 10:00:00:100 INFO] Level Name: Old World
[2024-03-01 10:00:01:000 INFO] Server started.
[2024-03-01 10:05:00:000 INFO] Player connected: Steve, xuid: 2535
[2024-03-01 10:09:00:000 INFO] Server stop requested.
[2024-03-01 11:00:00:000 INFO] Starting Server
[2024-03-01 11:00:00:050 INFO] Level Name: L1
[2024-03-01 11:00:00:060 INFO] Game mode: 0 Survival
[2024-03-01 11:00:00:070 INFO] Difficulty: 1 EASY
[2024-03-01 11:00:02:500 INFO] Server started.
";

#[test]
fn second_banner_resets_state() {
    let state = replay(TWO_RUNS);
    assert_eq!(state.start_time, Some(datetime!(2024-03-01 11:00:00)));
    assert_eq!(state.started_time, Some(datetime!(2024-03-01 11:00:02.5)));
    assert_eq!(state.stop_time, None);
    assert_eq!(state.user_count, 0);
    assert!(state.user_sessions.is_empty());
    assert_eq!(state.level_name.as_deref(), Some("L1"));
    assert_eq!(state.gamemode.as_deref(), Some("0 Survival"));
    assert_eq!(state.difficulty.as_deref(), Some("1 EASY"));
    assert_eq!(state.state, Some(ServerPhase::Started));
    assert!(state.has_started());
}

#[test]
fn tracks_player_spans_and_counts() {
    let state = replay(
        "[2024-03-01 10:00:00:000 INFO] Starting Server\n\
         [2024-03-01 10:00:01:000 INFO] Server started.\n\
         [2024-03-01 10:01:00:000 INFO] Player connected: Steve, xuid: 2535\n\
         [2024-03-01 10:02:00:000 INFO] Player connected: Alex, xuid: 2536\n\
         [2024-03-01 10:03:00:000 INFO] Player disconnected: Steve, xuid: 2535\n",
    );
    assert_eq!(state.user_count, 1);
    assert_eq!(state.state, Some(ServerPhase::Connected));
    let steve = state.user_sessions.get("Steve").expect("steve");
    assert_eq!(steve.disconnected, Some(datetime!(2024-03-01 10:03:00)));
    let alex = state.user_sessions.get("Alex").expect("alex");
    assert_eq!(alex.disconnected, None);
}

#[rstest]
fn trailing_fields_after_the_xuid_are_tolerated(dir: TempDir) {
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    let log = "[2024-03-01 10:00:00:000 INFO] Starting Server\n\
               [2024-03-01 10:00:01:000 INFO] Server started.\n\
               [2024-03-01 10:01:00:000 INFO] Player connected: Steve, xuid: 2535412345678901, pfid: 1a2b3c4d5e6f7a8b\n\
               [2024-03-01 10:02:00:000 INFO] Player disconnected: Steve, xuid: 2535412345678901, pfid: 1a2b3c4d5e6f7a8b\n";

    let state = parse_reader(Cursor::new(log.as_bytes()), &registry).expect("replay");
    assert_eq!(state.user_count, 0);
    assert_eq!(state.state, Some(ServerPhase::Disconnected));
    let steve = state.user_sessions.get("Steve").expect("steve");
    assert_eq!(steve.disconnected, Some(datetime!(2024-03-01 10:02:00)));

    let players = registry.known().expect("known");
    assert_eq!(
        players.first().map(|player| player.xuid.as_str()),
        Some("2535412345678901")
    );
}

#[test]
fn disconnect_without_connect_is_ignored() {
    let state = replay(
        "[2024-03-01 10:00:00:000 INFO] Starting Server\n\
         [2024-03-01 10:03:00:000 INFO] Player disconnected: Ghost\n",
    );
    assert_eq!(state.user_count, 0);
    assert!(state.user_sessions.is_empty());
    assert_eq!(state.state, Some(ServerPhase::Starting));
}

#[test]
fn last_disconnect_marks_disconnected() {
    let state = replay(
        "[2024-03-01 10:00:00:000 INFO] Starting Server\n\
         [2024-03-01 10:01:00:000 INFO] Player connected: Steve\n\
         [2024-03-01 10:02:00:000 INFO] Player disconnected: Steve\n",
    );
    assert_eq!(state.user_count, 0);
    assert_eq!(state.state, Some(ServerPhase::Disconnected));
}

#[test]
fn unprefixed_and_malformed_lines_are_dropped() {
    let state = replay(
        "    at stacktrace frame\n\
         [2024-03-01 10:00:00 INFO] Starting Server\n\
         [2024-03-01 10:00:00:000 WARN] Server started\n",
    );
    assert_eq!(state, LogState::default());
    assert!(!state.has_started());
}

#[test]
fn started_before_banner_does_not_count() {
    let mut state = LogState::default();
    state.start_time = Some(datetime!(2024-03-01 10:00:00));
    state.started_time = Some(datetime!(2024-03-01 10:00:00));
    assert!(!state.has_started());
}

#[rstest]
fn parse_file_distinguishes_missing_from_empty(dir: TempDir) {
    let path = dir.path().join("s1");
    let error = parse_file(&path, &NoopRegistry).expect_err("missing");
    assert_eq!(error.code(), 1202);

    fs::write(&path, "").expect("empty log");
    let state = parse_file(&path, &NoopRegistry).expect("empty state");
    assert_eq!(state, LogState::default());
}

#[rstest]
fn replay_feeds_player_registry(dir: TempDir) {
    let registry = JsonPlayerRegistry::in_dir(dir.path());
    let log = "[2024-03-01 10:00:00:000 INFO] Starting Server\n\
               [2024-03-01 10:00:00:000 INFO] Player connected: Steve, xuid: 2535\n\
               [2024-03-01 10:10:00:000 INFO] Player disconnected: Steve, xuid: 2535\n";

    parse_reader(Cursor::new(log.as_bytes()), &registry).expect("first replay");
    parse_reader(Cursor::new(log.as_bytes()), &registry).expect("second replay");

    let players = registry.known().expect("known");
    assert_eq!(players.len(), 1);
    assert_eq!(players.first().map(|player| player.playtime), Some(600));
}

#[test]
fn formatted_lines_replay() {
    let at = datetime!(2024-03-01 10:00:00.123);
    let line = format_line(at, "Starting Server");
    assert_eq!(line, "[2024-03-01 10:00:00:123 INFO] Starting Server");
    assert_eq!(replay(&line).start_time, Some(at));
}

#[test]
fn serialises_timestamps_in_log_format() {
    let state = replay(
        "[2024-03-01 10:00:00:000 INFO] Starting Server\n\
         [2024-03-01 10:01:00:000 INFO] Player connected: Steve\n",
    );
    let json = serde_json::to_value(&state).expect("serialise");
    assert_eq!(json["start-time"], "2024-03-01 10:00:00:000");
    assert_eq!(json["user-count"], 1);
    assert_eq!(
        json["user-sessions"]["Steve"]["connected"],
        "2024-03-01 10:01:00:000"
    );
    assert!(json["stop-time"].is_null());
}
