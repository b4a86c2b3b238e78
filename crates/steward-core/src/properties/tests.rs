//! Unit tests for property file handling.

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::error::Coded;

#[fixture]
fn dir() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

#[rstest]
fn read_skips_comments_and_splits_on_first_equals(dir: TempDir) {
    let path = dir.path().join("server.properties");
    fs::write(
        &path,
        "# comment\n\n server-name = Dedicated Server \nmotd=a=b\nno-separator\n",
    )
    .expect("write");

    let properties = read(&path).expect("read");
    assert_eq!(properties.len(), 2);
    assert_eq!(properties.get("server-name"), Some("Dedicated Server"));
    assert_eq!(properties.get("motd"), Some("a=b"));
}

#[rstest]
fn read_missing_file_reports_not_found(dir: TempDir) {
    let error = read(&dir.path().join("absent")).expect_err("should fail");
    assert!(error.is_not_found());
    assert_eq!(error.code(), 4011);
    assert!(read_or_default(&dir.path().join("absent"))
        .expect("default")
        .is_empty());
}

#[rstest]
fn write_preserves_insertion_order(dir: TempDir) {
    let path = dir.path().join("state.properties");
    let properties = Properties::from([("version", "1.20.1"), ("branch", "stable"), ("state", "created")]);
    write(&path, &properties).expect("write");

    let text = fs::read_to_string(&path).expect("read back");
    assert_eq!(text, "version=1.20.1\nbranch=stable\nstate=created\n");
    assert_eq!(read(&path).expect("read"), properties);
}

#[rstest]
fn entries_keep_repeated_keys(dir: TempDir) {
    let path = dir.path().join("manifest.properties");
    write_entries(&path, [("d1", "a.txt"), ("d1", "b.txt"), ("d2", "c.txt")]).expect("write");

    let entries = read_entries(&path).expect("entries");
    assert_eq!(entries.len(), 3);
    let folded = read(&path).expect("read");
    assert_eq!(folded.len(), 2);
    assert_eq!(folded.get("d1"), Some("b.txt"));
}

#[cfg(unix)]
#[rstest]
fn write_widens_permissions(dir: TempDir) {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("wide.properties");
    write(&path, &Properties::from([("a", "1")])).expect("write");
    let mode = fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o666);
}

#[rstest]
fn merge_applies_last_wins_precedence(dir: TempDir) {
    let old = dir.path().join("server_old.properties");
    let default = dir.path().join("server_default.properties");
    let start = dir.path().join("server_start.properties");
    let out = dir.path().join("server.properties");
    write(&old, &Properties::from([("a", "1"), ("b", "2")])).expect("old");
    write(&default, &Properties::from([("b", "3"), ("c", "4")])).expect("default");
    write(&start, &Properties::from([("c", "5")])).expect("start");

    let merged = merge(&[&old, &default, &start], Some(&out)).expect("merge");

    assert_eq!(merged, Properties::from([("a", "1"), ("b", "3"), ("c", "5")]));
    assert_eq!(read(&out).expect("materialized"), merged);
}

#[rstest]
fn merge_aborts_on_first_failing_input(dir: TempDir) {
    let present = dir.path().join("present.properties");
    let missing = dir.path().join("missing.properties");
    let out = dir.path().join("out.properties");
    write(&present, &Properties::from([("a", "1")])).expect("write");

    let error = merge(&[&present, &missing], Some(&out)).expect_err("should fail");

    assert_eq!(error.code(), 4021);
    let cause = error.cause().expect("cause");
    assert_eq!(cause.code(), 4011);
    assert!(matches!(error, PropertiesError::MergeInput { ref path, .. } if *path == missing));
    assert!(!out.exists(), "aborted merge must not write output");
}

#[test]
fn insert_keeps_position_of_existing_keys() {
    let mut properties = Properties::from([("a", "1"), ("b", "2")]);
    properties.insert("a", "9");
    properties.insert("c", "3");
    let keys: Vec<&str> = properties.keys().collect();
    assert_eq!(keys, ["a", "b", "c"]);
    assert_eq!(properties.get("a"), Some("9"));
    assert_eq!(properties.remove("b"), Some(String::from("2")));
    assert!(!properties.contains_key("b"));
}

#[test]
fn serialises_as_ordered_json_object() {
    let properties = Properties::from([("z", "1"), ("a", "2")]);
    let json = serde_json::to_string(&properties).expect("serialise");
    assert_eq!(json, r#"{"z":"1","a":"2"}"#);
}
