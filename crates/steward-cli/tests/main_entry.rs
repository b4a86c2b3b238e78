//! Integration tests for the `steward` binary entry point.
//!
//! Verifies the JSON output on stdout, the flattened error chain on stderr
//! and the exit status for usage errors.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

fn steward(root: &TempDir) -> Command {
    let mut command = cargo_bin_cmd!("steward");
    for (flag, directory) in [
        ("--downloads-dir", "downloaded_server"),
        ("--servers-dir", "server"),
        ("--logs-dir", "logs"),
        ("--backups-dir", "backups"),
    ] {
        command.arg(flag).arg(root.path().join(directory));
    }
    command
}

#[test]
fn backup_list_prints_an_empty_array() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut command = steward(&root);
    command.arg("backup-list");
    command.assert().success().stdout("[]\n");
}

#[test]
fn unknown_instance_reports_the_error_code() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut command = steward(&root);
    command.args(["get-worlds", "ghost"]);
    command
        .assert()
        .failure()
        .stderr(contains("code: 3021"));
}

#[test]
fn missing_command_exits_with_failure() {
    let mut command = cargo_bin_cmd!("steward");
    command.assert().failure();
}

#[test]
fn scheduler_job_file_round_trips_through_the_binary() {
    let root = tempfile::tempdir().expect("tempdir");
    let job_file = root.path().join("jobber").join("jobfile.yaml");
    let document = root.path().join("jobs.json");
    std::fs::write(&document, r#"{"jobs": {"Nightly": {"cmd": "steward backup-all"}}}"#)
        .expect("document");

    let mut set = steward(&root);
    set.arg("--scheduler-file")
        .arg(&job_file)
        .arg("scheduler-set")
        .arg(&document);
    set.assert().success().stdout(contains("\"state\":\"success\""));

    let mut get = steward(&root);
    get.arg("--scheduler-file")
        .arg(&job_file)
        .args(["scheduler-get", "--json"]);
    get.assert()
        .success()
        .stdout(contains("\"cmd\":\"steward backup-all\""));
}
