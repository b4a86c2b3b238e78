use std::path::PathBuf;

/// Root under which the container image mounts all persistent state.
pub const DEFAULT_ROOT: &str = "/entrypoint";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Ceiling, in poll ticks, for a server to report that it has started.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 60;

/// Ceiling, in poll ticks, for a session to disappear after `stop`.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// Length of one poll tick.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Upper bound on concurrently executing fan-out operations.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Vendor page listing the current server distributions.
pub const DEFAULT_DOWNLOAD_PAGE_URL: &str = "https://www.minecraft.net/en-us/download/server/bedrock";

/// Name of the server binary shipped in each distribution archive.
pub const DEFAULT_EXECUTABLE: &str = "bedrock_server";

/// Daemon executing scheduled jobs.
pub const DEFAULT_SCHEDULER_RUNNER: &str = "/usr/lib/x86_64-linux-gnu/jobberrunner";

/// Client controlling the scheduler daemon.
pub const DEFAULT_SCHEDULER_CONTROL: &str = "jobber";

/// Default directory caching downloaded distribution archives.
pub fn default_downloads_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT).join("downloaded_server")
}

/// Default directory holding one subdirectory per server instance.
pub fn default_servers_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT).join("server")
}

/// Default directory holding one log file per server instance.
pub fn default_logs_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT).join("logs")
}

/// Default directory holding backup records and the content store.
pub fn default_backups_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT).join("backups")
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Owned download page URL.
pub fn default_download_page_url() -> String {
    DEFAULT_DOWNLOAD_PAGE_URL.to_owned()
}

/// Owned executable name.
pub fn default_executable() -> String {
    DEFAULT_EXECUTABLE.to_owned()
}

/// Default job file read by the scheduler daemon.
pub fn default_scheduler_file() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT).join("jobber").join("jobfile.yaml")
}

/// Default directory holding the scheduler control socket.
pub fn default_scheduler_socket_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT).join("jobber").join("socket")
}

/// Owned scheduler daemon path.
pub fn default_scheduler_runner() -> String {
    DEFAULT_SCHEDULER_RUNNER.to_owned()
}

/// Owned scheduler client name.
pub fn default_scheduler_control() -> String {
    DEFAULT_SCHEDULER_CONTROL.to_owned()
}
