use std::sync::Arc;

use rstest::{fixture, rstest};
use steward_config::Config;
use tempfile::TempDir;

use super::*;
use crate::players::NoopRegistry;
use crate::properties::Properties;
use crate::session::{FakeBehaviour, FakeSessions, SessionRunner};
use crate::testing::{StaticCatalog, seed_download};
use crate::versions::Branch;

struct Fleet {
    _temp: TempDir,
    sessions: Arc<FakeSessions>,
    manager: ServerManager,
}

#[fixture]
fn fleet() -> Fleet {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = Config::rooted_at(temp.path());
    config.poll_interval_ms = 1;
    config.start_timeout_secs = 3;
    config.stop_timeout_secs = 3;
    config.worker_threads = 2;
    let layout = config.layout();
    layout.prepare().expect("layout");
    seed_download(&layout, Branch::Stable, "1.21.0").expect("seed");

    let sessions = Arc::new(FakeSessions::new());
    let manager = ServerManager::new(
        config,
        sessions.clone(),
        Arc::new(StaticCatalog::new("1.21.0", None)),
        Arc::new(NoopRegistry),
    );
    for (index, name) in ["a", "b", "c"].into_iter().enumerate() {
        let port = 20000 + index * 2;
        let defaults: Properties = [
            ("server-name", name.to_owned()),
            ("server-port", port.to_string()),
            ("server-portv6", (port + 1).to_string()),
        ]
        .into();
        manager.create(&defaults, false).expect("create");
    }
    Fleet {
        _temp: temp,
        sessions,
        manager,
    }
}

#[rstest]
fn start_all_isolates_failures(fleet: Fleet) {
    fleet.sessions.set_behaviour("b", FakeBehaviour::Hangs);

    let buckets = fleet.manager.start_all().expect("fan-out");
    assert_eq!(buckets.first, ["a", "c"]);
    assert!(buckets.second.is_empty());
    assert_eq!(buckets.failed.len(), 1);
    let failure = buckets.failed.first().expect("failure");
    assert_eq!(failure.server_name, "b");
    assert_eq!(failure.error.code, 1245);

    let again = fleet.manager.start_all().expect("fan-out");
    assert_eq!(again.second, ["a", "c"]);
}

#[rstest]
fn stop_all_includes_orphaned_sessions(fleet: Fleet) {
    fleet.manager.start_all().expect("start");
    let orphan_log = fleet.manager.layout().log_file("ghost");
    fleet.sessions.adopt("ghost", &orphan_log);

    let buckets = fleet.manager.stop_all(false).expect("stop");
    assert_eq!(buckets.first, ["a", "b", "c", "ghost"]);
    assert!(buckets.failed.is_empty());
    assert!(fleet.sessions.list().expect("list").is_empty());

    let again = fleet.manager.stop_all(false).expect("stop again");
    assert_eq!(again.second, ["a", "b", "c"]);
}

#[rstest]
fn update_all_reports_up_to_date_instances(fleet: Fleet) {
    let buckets = fleet.manager.update_all(false).expect("update");
    assert_eq!(buckets.second, ["a", "b", "c"]);
    assert!(buckets.first.is_empty());
}

#[rstest]
fn backup_all_skips_live_instances(fleet: Fleet) {
    for name in ["a", "b", "c"] {
        let world = fleet.manager.files(name).worlds().join("W");
        std::fs::create_dir_all(&world).expect("world");
        std::fs::write(world.join("level.dat"), name).expect("level");
    }
    fleet.manager.start_simple("a").expect("start");

    let buckets = fleet.manager.backup_all(true).expect("backup");
    assert_eq!(buckets.labels(), ["backed-up", "still-running"]);
    assert_eq!(buckets.first, ["b", "c"]);
    assert_eq!(buckets.second, ["a"]);
    assert_eq!(fleet.manager.backups().list().expect("list").len(), 2);
}

#[test]
fn buckets_serialize_under_their_labels() {
    let names = [String::from("x"), String::from("y")];
    let buckets = fan_out(2, &names, ["updated", "up-to-date"], |name| {
        if name == "x" {
            Ok(Bucket::First)
        } else {
            Err(ErrorReport::new("boom", 1260))
        }
    })
    .expect("fan-out");

    let json = serde_json::to_value(&buckets).expect("serialize");
    assert_eq!(json["updated"], serde_json::json!(["x"]));
    assert_eq!(json["up-to-date"], serde_json::json!([]));
    assert_eq!(json["failed"][0]["server-name"], "y");
    assert_eq!(json["failed"][0]["error"]["code"], 1260);
}
