//! Instance file names and operation results.

use std::path::{Path, PathBuf};

use serde::Serialize;
use strum::{Display, EnumString};

use crate::logstate::LogState;
use crate::properties::Properties;
use crate::versions::{Branch, Version};

/// Lifecycle metadata: version, branch and state.
pub const STATE_FILE: &str = "state.properties";
/// Administrator-supplied static configuration.
pub const DEFAULT_FILE: &str = "server_default.properties";
/// Per-start overrides.
pub const START_FILE: &str = "server_start.properties";
/// Pristine configuration shipped with the distribution.
pub const SHIPPED_FILE: &str = "server_old.properties";
/// Materialized configuration read by the server.
pub const LIVE_FILE: &str = "server.properties";
/// Directory holding the worlds of an instance.
pub const WORLDS_DIR: &str = "worlds";

pub(crate) const KEY_SERVER_NAME: &str = "server-name";
pub(crate) const KEY_LEVEL_NAME: &str = "level-name";
pub(crate) const KEY_VERSION: &str = "version";
pub(crate) const KEY_BRANCH: &str = "branch";
pub(crate) const KEY_STATE: &str = "state";
pub(crate) const PORT_KEYS: [&str; 2] = ["server-port", "server-portv6"];

/// Instance artefacts carried over by an update besides the worlds.
pub(crate) const CARRIED_FILES: [&str; 3] = ["permissions.json", "allowlist.json", "whitelist.json"];

/// Paths of the property files of one instance.
#[derive(Debug, Clone)]
pub struct InstanceFiles {
    root: PathBuf,
}

impl InstanceFiles {
    /// Files of the instance rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Instance directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lifecycle metadata file.
    #[must_use]
    pub fn state(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Static configuration file.
    #[must_use]
    pub fn defaults(&self) -> PathBuf {
        self.root.join(DEFAULT_FILE)
    }

    /// Per-start override file.
    #[must_use]
    pub fn start(&self) -> PathBuf {
        self.root.join(START_FILE)
    }

    /// Shipped configuration file.
    #[must_use]
    pub fn shipped(&self) -> PathBuf {
        self.root.join(SHIPPED_FILE)
    }

    /// Materialized configuration file.
    #[must_use]
    pub fn live(&self) -> PathBuf {
        self.root.join(LIVE_FILE)
    }

    /// Worlds directory.
    #[must_use]
    pub fn worlds(&self) -> PathBuf {
        self.root.join(WORLDS_DIR)
    }
}

/// Persisted lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Unpacked but never run.
    Created,
    /// Hosted by a live session.
    Started,
    /// Has run before and is not live now.
    Stopped,
}

/// Result of creating an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateResult {
    /// Instance name.
    pub server_name: String,
    /// Installed version.
    pub version: Version,
    /// Installed branch.
    pub branch: Branch,
    /// Persisted static configuration.
    pub default_properties: Properties,
}

/// Result of removing an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoveResult {
    /// Instance name.
    pub server_name: String,
    /// Always `removed`.
    pub state: &'static str,
}

/// How a start request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StartState {
    /// A session was spawned and the server reported readiness.
    Started,
    /// A session was live already; nothing changed.
    AlreadyRunning,
}

/// Result of starting an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StartResult {
    /// Instance name.
    pub server_name: String,
    /// Installed version, when known.
    pub version: Option<String>,
    /// Installed branch, when known.
    pub branch: Option<String>,
    /// What happened.
    pub state: StartState,
    /// Poll ticks until readiness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<u64>,
    /// Log state at readiness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogState>,
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StopState {
    /// No session was live.
    NothingToStop,
    /// The server shut down after the stop command.
    Stopped,
    /// The session had to be terminated.
    Killed,
}

/// Result of stopping an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StopResult {
    /// Instance name.
    pub server_name: String,
    /// What happened.
    pub state: StopState,
    /// Poll ticks spent waiting, including any countdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<u64>,
}

/// Result of typing a line into a live instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SendResult {
    /// Instance name.
    pub server_name: String,
    /// The line as typed.
    pub command: String,
}

/// Created and live instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListResult {
    /// Instances with a directory.
    pub created: Vec<String>,
    /// Live session names.
    pub running: Vec<String>,
}

/// Read-only view of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Details {
    /// Instance name.
    pub server_name: String,
    /// Installed version, when recorded.
    pub version: Option<String>,
    /// Installed branch, when recorded.
    pub branch: Option<String>,
    /// Reported lifecycle state.
    pub state: InstanceState,
    /// World directory names.
    pub worlds: Vec<String>,
    /// Log state of the latest run, when a log exists.
    pub log: Option<LogState>,
    /// Effective configuration.
    pub properties: Properties,
}

/// How an update request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    /// The instance was reinstalled at the target version.
    Updated,
    /// The instance already runs the target version.
    UpToDate,
}

/// Result of updating an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateResult {
    /// Instance name.
    pub server_name: String,
    /// Branch of both versions.
    pub branch: Branch,
    /// Version before the update.
    pub previous_version: Version,
    /// Version after the update.
    pub version: Version,
    /// What happened.
    pub state: UpdateState,
}
