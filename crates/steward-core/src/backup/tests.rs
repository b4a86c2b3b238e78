//! Backup flows against real instance directories.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rstest::{fixture, rstest};
use steward_config::Config;
use tempfile::TempDir;
use walkdir::WalkDir;

use super::*;
use crate::error::Coded;
use crate::lifecycle::ServerManager;
use crate::players::NoopRegistry;
use crate::session::FakeSessions;
use crate::testing::{StaticCatalog, seed_download};
use crate::versions::Branch;

struct Sandbox {
    _temp: TempDir,
    manager: ServerManager,
    engine: BackupEngine,
}

impl Sandbox {
    fn instance(&self, name: &str, level: &str) -> PathBuf {
        let defaults: Properties = [("server-name", name), ("level-name", level)].into();
        self.manager.create(&defaults, false).expect("create");
        self.world(name, level)
    }

    fn world(&self, name: &str, level: &str) -> PathBuf {
        let world = self.manager.files(name).worlds().join(level);
        fs::create_dir_all(world.join("db")).expect("world");
        world
    }

    fn blobs(&self) -> usize {
        fs::read_dir(self.manager.layout().content_store_dir())
            .expect("store")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_str().is_some_and(is_digest))
            .count()
    }
}

#[fixture]
fn sandbox() -> Sandbox {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = Config::rooted_at(temp.path());
    config.poll_interval_ms = 1;
    config.start_timeout_secs = 5;
    config.stop_timeout_secs = 5;
    let layout = config.layout();
    layout.prepare().expect("layout");
    seed_download(&layout, Branch::Stable, "1.21.0").expect("seed");
    let manager = ServerManager::new(
        config,
        Arc::new(FakeSessions::new()),
        Arc::new(StaticCatalog::new("1.21.0", None)),
        Arc::new(NoopRegistry),
    );
    let engine = manager.backups();
    Sandbox {
        _temp: temp,
        manager,
        engine,
    }
}

fn fill(world: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = world.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent");
        }
        fs::write(path, content).expect("world file");
    }
}

fn snapshot(world: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(world)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(world)
                .expect("below world")
                .to_string_lossy()
                .into_owned();
            (relative, fs::read(entry.path()).expect("read"))
        })
        .collect()
}

fn named(server: &str, backup: &str) -> BackupRequest {
    BackupRequest {
        backup_name: Some(backup.to_owned()),
        ..BackupRequest::new(server)
    }
}

#[rstest]
fn default_backup_resolves_the_only_world(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "dat"), ("db/000001.ldb", "chunk")]);

    let created = sandbox
        .engine
        .create(&BackupRequest::new("s1"))
        .expect("backup");
    let summary = created.summary;
    assert!(summary.backup_name.ends_with("_s1_L1"));
    assert_eq!(summary.level_name, "L1");
    assert_eq!(summary.version, "1.21.0");
    assert_eq!(summary.branch, "stable");
    assert_eq!(summary.file_count, 2);
    assert_eq!(created.stored_blobs, 2);

    let listed = sandbox.engine.list().expect("list");
    assert_eq!(listed, [summary]);
}

#[rstest]
fn identical_content_is_stored_once(sandbox: Sandbox) {
    let first = sandbox.instance("s1", "L1");
    let second = sandbox.instance("s2", "L2");
    fill(&first, &[("db/shared.ldb", "same bytes"), ("level.dat", "one")]);
    fill(&second, &[("db/shared.ldb", "same bytes"), ("level.dat", "two")]);

    sandbox.engine.create(&named("s1", "b1")).expect("b1");
    let created = sandbox.engine.create(&named("s2", "b2")).expect("b2");
    assert_eq!(created.stored_blobs, 1);
    assert_eq!(sandbox.blobs(), 3);
}

#[rstest]
fn repeated_content_within_a_world_is_kept_per_file(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("a.txt", ""), ("b.txt", ""), ("db/c.txt", "")]);

    let created = sandbox.engine.create(&named("s1", "b1")).expect("backup");
    assert_eq!(created.summary.file_count, 3);
    assert_eq!(sandbox.blobs(), 1);

    fs::remove_dir_all(&world).expect("drop world");
    sandbox.engine.restore("b1", None, None).expect("restore");
    assert_eq!(snapshot(&world).len(), 3);
}

#[rstest]
#[case::raw(false)]
#[case::compressed(true)]
fn restore_rebuilds_the_world(sandbox: Sandbox, #[case] compress: bool) {
    let world = sandbox.instance("s1", "L1");
    fill(
        &world,
        &[
            ("levelname.txt", "L1"),
            ("level.dat", "dat"),
            ("db/000001.ldb", "chunk"),
            ("db/MANIFEST-000002", "manifest"),
        ],
    );
    let before = snapshot(&world);
    let request = BackupRequest {
        compress,
        ..named("s1", "b1")
    };
    sandbox.engine.create(&request).expect("backup");

    fs::remove_dir_all(&world).expect("drop world");
    let restored = sandbox.engine.restore("b1", None, None).expect("restore");
    assert_eq!(restored.level_name, "L1");
    assert_eq!(restored.file_count, 4);
    assert_eq!(snapshot(&world), before);
}

#[rstest]
fn restore_under_another_level_rewrites_the_marker(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("levelname.txt", "L1"), ("level.dat", "dat")]);
    sandbox.engine.create(&named("s1", "b1")).expect("backup");

    sandbox
        .engine
        .restore("b1", Some("s1"), Some("L9"))
        .expect("restore");
    let copy = sandbox.manager.files("s1").worlds().join("L9");
    assert_eq!(fs::read_to_string(copy.join(LEVEL_MARKER)).expect("marker"), "L9");
    assert_eq!(fs::read_to_string(copy.join("level.dat")).expect("dat"), "dat");
    assert_eq!(snapshot(&world).len(), 2);
}

#[rstest]
fn corrupt_backup_leaves_the_target_untouched(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "dat"), ("db/000001.ldb", "chunk")]);
    sandbox.engine.create(&named("s1", "b1")).expect("backup");
    let before = snapshot(&world);

    let digest = digest_file(&world.join("level.dat")).expect("digest");
    fs::remove_file(sandbox.manager.layout().blob(&digest)).expect("drop blob");
    fill(&world, &[("new.txt", "played since")]);

    let error = sandbox
        .engine
        .restore("b1", None, None)
        .expect_err("corrupt");
    assert_eq!(error.code(), 2024);
    let after = snapshot(&world);
    assert_eq!(after.len(), before.len() + 1);
    assert!(after.contains_key("new.txt"));
}

#[rstest]
fn remove_collects_unreferenced_blobs(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "v1"), ("db/000001.ldb", "chunk")]);
    sandbox.engine.create(&named("s1", "b1")).expect("b1");
    fill(&world, &[("level.dat", "v2")]);
    sandbox.engine.create(&named("s1", "b2")).expect("b2");
    assert_eq!(sandbox.blobs(), 3);

    let removed = sandbox.engine.remove("b1").expect("remove b1");
    assert_eq!(removed.collected_blobs, 1);
    assert_eq!(sandbox.blobs(), 2);
    sandbox.engine.restore("b2", None, None).expect("b2 intact");

    sandbox.engine.remove("b2").expect("remove b2");
    assert_eq!(sandbox.blobs(), 0);
    assert!(sandbox.engine.list().expect("list").is_empty());
    assert_eq!(
        sandbox.engine.remove("b2").expect_err("gone").code(),
        2043
    );
}

#[rstest]
fn several_worlds_need_a_level_name(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "one")]);
    sandbox.world("s1", "L2");

    let error = sandbox
        .engine
        .create(&BackupRequest::new("s1"))
        .expect_err("ambiguous");
    assert_eq!(error.code(), 2013);

    let request = BackupRequest {
        level_name: Some(String::from("L2")),
        ..named("s1", "b2")
    };
    let created = sandbox.engine.create(&request).expect("explicit level");
    assert_eq!(created.summary.level_name, "L2");

    let missing = BackupRequest {
        level_name: Some(String::from("L7")),
        ..named("s1", "b7")
    };
    assert_eq!(
        sandbox.engine.create(&missing).expect_err("missing").code(),
        2014
    );
}

#[rstest]
fn names_collide_unless_overwritten(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "v1")]);
    sandbox.engine.create(&named("s1", "b1")).expect("first");

    let error = sandbox
        .engine
        .create(&named("s1", "b1"))
        .expect_err("collision");
    assert_eq!(error.code(), 2019);

    let request = BackupRequest {
        overwrite: true,
        description: Some(String::from("nightly")),
        ..named("s1", "b1")
    };
    sandbox.engine.create(&request).expect("overwrite");
    let listed = sandbox.engine.list().expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed.first().and_then(|summary| summary.description.as_deref()),
        Some("nightly")
    );
}

#[rstest]
fn overwriting_collects_content_only_the_old_record_used(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "v1"), ("db/shared.ldb", "same")]);
    sandbox.engine.create(&named("s1", "b1")).expect("first");
    assert_eq!(sandbox.blobs(), 2);

    fill(&world, &[("level.dat", "v2")]);
    let request = BackupRequest {
        overwrite: true,
        ..named("s1", "b1")
    };
    let replaced = sandbox.engine.create(&request).expect("overwrite");
    assert_eq!(replaced.stored_blobs, 1);
    assert_eq!(replaced.collected_blobs, 1);
    assert_eq!(sandbox.blobs(), 2);

    fs::remove_dir_all(&world).expect("wipe world");
    sandbox.engine.restore("b1", None, None).expect("restore");
    assert_eq!(fs::read_to_string(world.join("level.dat")).expect("dat"), "v2");
}

#[rstest]
fn live_world_is_refused(sandbox: Sandbox) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "dat")]);
    sandbox.engine.create(&named("s1", "b1")).expect("backup");
    sandbox.manager.start_simple("s1").expect("start");

    assert_eq!(
        sandbox
            .engine
            .create(&named("s1", "b2"))
            .expect_err("in use")
            .code(),
        2015
    );
    assert_eq!(
        sandbox
            .engine
            .restore("b1", None, None)
            .expect_err("in use")
            .code(),
        2025
    );
    sandbox
        .engine
        .restore("b1", None, Some("L2"))
        .expect("inactive level");
}

#[rstest]
#[case::traversal("../escape")]
#[case::nested("a/b")]
#[case::hidden(".store")]
fn unusable_backup_names_are_refused(sandbox: Sandbox, #[case] backup: &str) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "dat")]);

    let error = sandbox
        .engine
        .create(&named("s1", backup))
        .expect_err("invalid");
    assert_eq!(error.code(), 2010);
    assert_eq!(sandbox.engine.remove(backup).expect_err("invalid").code(), 2040);
    assert_eq!(sandbox.engine.remove("  ").expect_err("empty").code(), 2041);
}

#[rstest]
fn unknown_servers_are_reported(sandbox: Sandbox) {
    let error = sandbox
        .engine
        .create(&BackupRequest::new("ghost"))
        .expect_err("ghost");
    assert_eq!(error.code(), 2012);
    assert_eq!(error.cause().map(|cause| cause.code()), Some(3021));
}

#[rstest]
#[case::parent_level(Some("s1"), Some(".."), 3031)]
#[case::root_level(Some("s1"), Some("../.."), 3031)]
#[case::parent_server(Some(".."), Some("L1"), 3022)]
fn restore_targets_stay_inside_the_servers_directory(
    sandbox: Sandbox,
    #[case] server: Option<&str>,
    #[case] level: Option<&str>,
    #[case] cause: u16,
) {
    let world = sandbox.instance("s1", "L1");
    fill(&world, &[("level.dat", "dat")]);
    sandbox.engine.create(&named("s1", "b1")).expect("backup");

    let error = sandbox
        .engine
        .restore("b1", server, level)
        .expect_err("refused");
    assert_eq!(error.code(), 2022);
    assert_eq!(error.cause().map(|found| found.code()), Some(cause));
    assert!(world.join("level.dat").is_file());
    assert!(sandbox.manager.files("s1").defaults().is_file());
}

#[rstest]
fn create_refuses_server_names_with_separators(sandbox: Sandbox) {
    let error = sandbox
        .engine
        .create(&BackupRequest::new("../s1"))
        .expect_err("refused");
    assert_eq!(error.code(), 2012);
    assert_eq!(error.cause().map(|cause| cause.code()), Some(3022));
}
