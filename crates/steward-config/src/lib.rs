//! Shared configuration for the steward toolkit.
//!
//! Configuration is resolved once at startup through `ortho_config`, layering
//! defaults, an optional configuration file, `STEWARD_*` environment variables
//! and command-line flags. The resulting [`Config`] is passed by reference into
//! every component; nothing reads paths from ambient globals.

mod defaults;
mod layout;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DOWNLOAD_PAGE_URL, DEFAULT_EXECUTABLE, DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SCHEDULER_CONTROL, DEFAULT_SCHEDULER_RUNNER, DEFAULT_START_TIMEOUT_SECS,
    DEFAULT_STOP_TIMEOUT_SECS, DEFAULT_WORKER_THREADS, default_backups_dir,
    default_download_page_url, default_downloads_dir, default_executable, default_log_filter,
    default_log_format, default_logs_dir, default_scheduler_control, default_scheduler_file,
    default_scheduler_runner, default_scheduler_socket_dir, default_servers_dir,
};
pub use layout::{CONTENT_STORE_DIR, Layout, LayoutError, RECORD_EXTENSION, create_shared_dir};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration shared by the CLI and the core library.
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "STEWARD")]
pub struct Config {
    /// Directory caching downloaded distribution archives.
    #[ortho_config(default = default_downloads_dir())]
    pub downloads_dir: PathBuf,
    /// Directory holding one subdirectory per server instance.
    #[ortho_config(default = default_servers_dir())]
    pub servers_dir: PathBuf,
    /// Directory holding one log file per server instance.
    #[ortho_config(default = default_logs_dir())]
    pub logs_dir: PathBuf,
    /// Directory holding backup records and the content store.
    #[ortho_config(default = default_backups_dir())]
    pub backups_dir: PathBuf,
    /// Tracing filter expression.
    #[ortho_config(default = default_log_filter())]
    pub log_filter: String,
    /// Tracing output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Poll ticks to wait for a server to report that it has started.
    #[ortho_config(default = DEFAULT_START_TIMEOUT_SECS)]
    pub start_timeout_secs: u64,
    /// Poll ticks to wait for a session to vanish after a stop command.
    #[ortho_config(default = DEFAULT_STOP_TIMEOUT_SECS)]
    pub stop_timeout_secs: u64,
    /// Length of one poll tick in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
    /// Upper bound on concurrently executing fan-out operations.
    #[ortho_config(default = DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,
    /// Vendor page scraped for the current online versions.
    #[ortho_config(default = default_download_page_url())]
    pub download_page_url: String,
    /// Server binary started inside the instance directory.
    #[ortho_config(default = default_executable())]
    pub executable: String,
    /// Job file read by the scheduler daemon.
    #[ortho_config(default = default_scheduler_file())]
    pub scheduler_file: PathBuf,
    /// Directory holding the scheduler control socket.
    #[ortho_config(default = default_scheduler_socket_dir())]
    pub scheduler_socket_dir: PathBuf,
    /// Scheduler daemon started inside its own session.
    #[ortho_config(default = default_scheduler_runner())]
    pub scheduler_runner: String,
    /// Client used to query and steer scheduled jobs.
    #[ortho_config(default = default_scheduler_control())]
    pub scheduler_control: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
            servers_dir: default_servers_dir(),
            logs_dir: default_logs_dir(),
            backups_dir: default_backups_dir(),
            log_filter: default_log_filter(),
            log_format: default_log_format(),
            start_timeout_secs: DEFAULT_START_TIMEOUT_SECS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
            download_page_url: default_download_page_url(),
            executable: default_executable(),
            scheduler_file: default_scheduler_file(),
            scheduler_socket_dir: default_scheduler_socket_dir(),
            scheduler_runner: default_scheduler_runner(),
            scheduler_control: default_scheduler_control(),
        }
    }
}

impl Config {
    /// Builds a configuration whose directories all live below `root`.
    #[must_use]
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            downloads_dir: root.join("downloaded_server"),
            servers_dir: root.join("server"),
            logs_dir: root.join("logs"),
            backups_dir: root.join("backups"),
            scheduler_file: root.join("jobber").join("jobfile.yaml"),
            scheduler_socket_dir: root.join("jobber").join("socket"),
            ..Self::default()
        }
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Tracing output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Directory layout derived from the configured roots.
    #[must_use]
    pub fn layout(&self) -> Layout {
        Layout::from_config(self)
    }

    /// Length of one poll tick.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fan-out worker bound, never below one.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads.max(1)
    }
}
