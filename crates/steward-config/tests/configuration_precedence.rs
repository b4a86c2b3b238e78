//! Configuration layering: defaults, configuration file, environment, then
//! CLI flags.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use rstest::rstest;
use tempfile::TempDir;

use steward_config::{Config, LogFormat, default_servers_dir};

struct EnvGuard {
    key: &'static str,
    previous: Option<OsString>,
}

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` in edition 2024; the guard restores
        // the previous value on drop.
        unsafe { std::env::set_var(key, value) };
        Self { key, previous }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

fn load(args: &[&str]) -> Config {
    let args = args.iter().map(OsString::from);
    match Config::load_from_iter(args) {
        Ok(config) => config,
        Err(error) => panic!("configuration failed to load: {error}"),
    }
}

#[rstest]
fn defaults_apply_without_overrides() {
    let config = load(&["steward"]);
    assert_eq!(config.servers_dir, default_servers_dir());
}

#[rstest]
fn cli_flag_overrides_default() {
    let config = load(&["steward", "--logs-dir", "/var/tmp/steward-logs"]);
    assert_eq!(config.logs_dir, PathBuf::from("/var/tmp/steward-logs"));
}

#[rstest]
fn environment_overrides_default_and_cli_overrides_environment() {
    let _guard = EnvGuard::set("STEWARD_LOG_FORMAT", "json");
    let from_env = load(&["steward"]);
    assert_eq!(from_env.log_format, LogFormat::Json);

    let from_cli = load(&["steward", "--log-format", "compact"]);
    assert_eq!(from_cli.log_format, LogFormat::Compact);
}

#[rstest]
fn configuration_file_sits_between_defaults_and_overrides() {
    let temp_dir = match TempDir::new() {
        Ok(dir) => dir,
        Err(error) => panic!("failed to create temporary directory: {error}"),
    };
    let path = temp_dir.path().join("steward.toml");
    let toml = concat!(
        "servers_dir = \"/srv/steward/server\"\n",
        "backups_dir = \"/srv/steward/backups\"\n",
        "poll_interval_ms = 250\n",
    );
    if let Err(error) = fs::write(&path, toml) {
        panic!("failed to write configuration: {error}");
    }
    let Some(file) = path.to_str() else {
        panic!("temporary path is not UTF-8");
    };

    let from_file = load(&["steward", "--config-path", file]);
    assert_eq!(from_file.servers_dir, PathBuf::from("/srv/steward/server"));
    assert_eq!(from_file.poll_interval_ms, 250);

    let _guard = EnvGuard::set("STEWARD_BACKUPS_DIR", "/var/tmp/steward-backups");
    let from_env = load(&["steward", "--config-path", file]);
    assert_eq!(from_env.backups_dir, PathBuf::from("/var/tmp/steward-backups"));

    let from_cli = load(&[
        "steward",
        "--config-path",
        file,
        "--servers-dir",
        "/opt/steward/server",
        "--backups-dir",
        "/opt/steward/backups",
    ]);
    assert_eq!(from_cli.servers_dir, PathBuf::from("/opt/steward/server"));
    assert_eq!(from_cli.backups_dir, PathBuf::from("/opt/steward/backups"));
    assert_eq!(from_cli.poll_interval_ms, 250);
}
