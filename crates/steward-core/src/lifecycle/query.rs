//! Read-only views of instances.

use std::path::Path;

use tracing::debug;

use super::error::{LifecycleError, Operation, PropertiesAction};
use super::types::{Details, InstanceFiles, InstanceState, KEY_BRANCH, KEY_VERSION, ListResult};
use super::{LIFECYCLE_TARGET, ServerManager};
use crate::fsutil;
use crate::logstate::{self, LogError, LogState};
use crate::properties::{self, Properties};
use crate::scheduler::SCHEDULER_SESSION;
use crate::worlds::{self, RemoveWorldResult, WorldError};

impl ServerManager {
    /// Created instances and live sessions.
    ///
    /// # Errors
    ///
    /// Fails when the servers directory or the session list cannot be read.
    pub fn list(&self) -> Result<ListResult, LifecycleError> {
        let servers = self.layout.servers_dir();
        let created =
            fsutil::subdirectories(servers).map_err(|source| LifecycleError::ListInstances {
                path: servers.to_path_buf(),
                source,
            })?;
        let running = self
            .sessions
            .list()
            .map_err(|source| LifecycleError::Sessions {
                operation: Operation::List,
                source,
            })?
            .into_iter()
            .filter(|session| session != SCHEDULER_SESSION)
            .collect();
        Ok(ListResult { created, running })
    }

    /// Replays the log of an instance.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty or the log is missing or unreadable.
    pub fn log_state(&self, name: &str) -> Result<LogState, LogError> {
        if name.trim().is_empty() {
            return Err(LogError::NameRequired);
        }
        logstate::parse_file(&self.layout.log_file(name), self.players())
    }

    /// Reported state: live instances are started, instances without any
    /// world are created and the rest are stopped.
    ///
    /// # Errors
    ///
    /// Fails when liveness or the worlds cannot be determined.
    pub fn instance_state(&self, name: &str) -> Result<InstanceState, LifecycleError> {
        self.existing(Operation::Details, name)?;
        if self.running(Operation::Details, name)? {
            return Ok(InstanceState::Started);
        }
        let found = self.worlds(name).map_err(|source| LifecycleError::Worlds {
            operation: Operation::Details,
            name: name.to_owned(),
            source,
        })?;
        Ok(if found.is_empty() {
            InstanceState::Created
        } else {
            InstanceState::Stopped
        })
    }

    /// Version, worlds, log state and effective configuration of an instance.
    ///
    /// Nothing is written; before the first start the effective configuration
    /// is previewed by merging the layers in memory.
    ///
    /// # Errors
    ///
    /// Fails when the instance does not exist or any of its files cannot be
    /// read.
    pub fn details(&self, name: &str) -> Result<Details, LifecycleError> {
        let files = self.existing(Operation::Details, name)?;
        let metadata = self.read_state(Operation::Details, name, &files)?;
        let state = self.instance_state(name)?;
        let found = self.worlds(name).map_err(|source| LifecycleError::Worlds {
            operation: Operation::Details,
            name: name.to_owned(),
            source,
        })?;
        let log = self.current_log(Operation::Details, name)?;
        let effective = effective_properties(&files).map_err(|source| {
            LifecycleError::Properties {
                operation: Operation::Details,
                action: PropertiesAction::ReadLive,
                name: name.to_owned(),
                source,
            }
        })?;
        debug!(target: LIFECYCLE_TARGET, server = name, %state, "details collected");
        Ok(Details {
            server_name: name.to_owned(),
            version: metadata.get(KEY_VERSION).map(str::to_owned),
            branch: metadata.get(KEY_BRANCH).map(str::to_owned),
            state,
            worlds: found,
            log,
            properties: effective,
        })
    }

    /// World directory names of an instance.
    ///
    /// # Errors
    ///
    /// See [`worlds::worlds`].
    pub fn worlds(&self, name: &str) -> Result<Vec<String>, WorldError> {
        worlds::worlds(&self.layout, name)
    }

    /// Level named by the effective configuration of an instance.
    ///
    /// # Errors
    ///
    /// See [`worlds::current_world`].
    pub fn current_world(&self, name: &str) -> Result<String, WorldError> {
        worlds::current_world(&self.layout, name)
    }

    /// Whether `level` (default: the current world) is held by a live
    /// instance.
    ///
    /// # Errors
    ///
    /// See [`worlds::world_in_use`].
    pub fn world_in_use(&self, name: &str, level: Option<&str>) -> Result<bool, WorldError> {
        worlds::world_in_use(&self.layout, self.sessions(), name, level)
    }

    /// Deletes a world that is not in use.
    ///
    /// # Errors
    ///
    /// See [`worlds::remove_world`].
    pub fn remove_world(&self, name: &str, level: &str) -> Result<RemoveWorldResult, WorldError> {
        worlds::remove_world(&self.layout, self.sessions(), name, level)
    }
}

fn effective_properties(files: &InstanceFiles) -> Result<Properties, properties::PropertiesError> {
    let live = files.live();
    if live.is_file() {
        return properties::read(&live);
    }
    let shipped = files.shipped();
    let defaults = files.defaults();
    let start = files.start();
    let layers: Vec<&Path> = [shipped.as_path(), defaults.as_path(), start.as_path()]
        .into_iter()
        .filter(|layer| layer.is_file())
        .collect();
    properties::merge(&layers, None)
}
