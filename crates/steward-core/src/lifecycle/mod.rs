//! Instance lifecycle management.
//!
//! The module is split by concern:
//! - [`types`] names the instance files and the operation results.
//! - [`error`] captures the error surface of every operation.
//! - [`provisioning`] creates and removes instances.
//! - [`spawning`] materializes configuration and boots sessions.
//! - [`monitoring`] polls the log and the session list.
//! - [`shutdown`] stops instances and types into their sessions.
//! - [`update`] reinstalls instances at another version.
//! - [`query`] answers read-only questions about instances.
//!
//! Every operation is a method on [`ServerManager`], which owns the shared
//! configuration and the collaborators it drives.

mod error;
mod monitoring;
mod provisioning;
mod query;
mod shutdown;
mod spawning;
mod types;
mod update;


use std::fmt;
use std::sync::Arc;

use steward_config::{Config, Layout};
use tracing::debug;

use crate::backup::BackupEngine;
use crate::players::{JsonPlayerRegistry, PlayerRegistry};
use crate::properties::{self, Properties};
use crate::scheduler::{JobScheduler, ProcessControl};
use crate::session::{ScreenSessions, SessionRunner};
use crate::versions::{Catalog, HttpCatalog};

pub use error::{LifecycleError, Operation, PropertiesAction, UpdateFailure, UpdateStep};
pub(crate) use types::{KEY_BRANCH, KEY_LEVEL_NAME, KEY_SERVER_NAME, KEY_VERSION};
use types::KEY_STATE;
pub use types::{
    CreateResult, DEFAULT_FILE, Details, InstanceFiles, InstanceState, LIVE_FILE, ListResult,
    RemoveResult, SHIPPED_FILE, START_FILE, STATE_FILE, SendResult, StartResult, StartState,
    StopResult, StopState, UpdateResult, UpdateState, WORLDS_DIR,
};

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Drives instances through create, start, stop, update and remove.
///
/// Cloning is cheap; clones share the collaborators.
#[derive(Clone)]
pub struct ServerManager {
    config: Config,
    layout: Layout,
    sessions: Arc<dyn SessionRunner>,
    catalog: Arc<dyn Catalog>,
    players: Arc<dyn PlayerRegistry>,
}

impl ServerManager {
    /// Builds a manager from explicit collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionRunner>,
        catalog: Arc<dyn Catalog>,
        players: Arc<dyn PlayerRegistry>,
    ) -> Self {
        let layout = config.layout();
        Self {
            config,
            layout,
            sessions,
            catalog,
            players,
        }
    }

    /// Builds a manager backed by GNU `screen`, the vendor download page and
    /// the JSON player registry.
    #[must_use]
    pub fn system(config: Config) -> Self {
        let catalog = HttpCatalog::new(config.download_page_url.clone());
        let players = JsonPlayerRegistry::in_dir(&config.servers_dir);
        Self::new(
            config,
            Arc::new(ScreenSessions::new()),
            Arc::new(catalog),
            Arc::new(players),
        )
    }

    /// Shared configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Directory layout.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Session manager.
    #[must_use]
    pub fn sessions(&self) -> &dyn SessionRunner {
        self.sessions.as_ref()
    }

    /// Version catalogue.
    #[must_use]
    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    /// Player registry fed by log replays.
    #[must_use]
    pub fn players(&self) -> &dyn PlayerRegistry {
        self.players.as_ref()
    }

    /// Backup engine sharing this manager's layout and sessions.
    #[must_use]
    pub fn backups(&self) -> BackupEngine {
        BackupEngine::new(self.layout.clone(), Arc::clone(&self.sessions))
            .with_lock_wait(self.config.poll_interval(), self.config.stop_timeout_secs)
    }

    /// Job scheduler sharing this manager's configuration and sessions.
    #[must_use]
    pub fn scheduler(&self) -> JobScheduler {
        let control = ProcessControl::new(self.config.scheduler_control.clone());
        JobScheduler::new(self.config.clone(), Arc::clone(&self.sessions), Arc::new(control))
    }

    /// Files of the named instance.
    #[must_use]
    pub fn files(&self, name: &str) -> InstanceFiles {
        InstanceFiles::new(self.layout.instance_dir(name))
    }

    /// Files of the named instance, which must exist.
    pub(crate) fn existing(
        &self,
        operation: Operation,
        name: &str,
    ) -> Result<InstanceFiles, LifecycleError> {
        if name.trim().is_empty() {
            return Err(LifecycleError::name_required(operation));
        }
        LifecycleError::checked_name(operation, name)?;
        let files = self.files(name);
        if !files.root().is_dir() {
            return Err(LifecycleError::NotCreated {
                operation,
                name: name.to_owned(),
            });
        }
        Ok(files)
    }

    /// Lifecycle metadata of an instance; empty when never written.
    pub(crate) fn read_state(
        &self,
        operation: Operation,
        name: &str,
        files: &InstanceFiles,
    ) -> Result<Properties, LifecycleError> {
        properties::read_or_default(&files.state()).map_err(|source| LifecycleError::Properties {
            operation,
            action: PropertiesAction::ReadState,
            name: name.to_owned(),
            source,
        })
    }

    /// Persists a new lifecycle state, keeping version and branch.
    pub(crate) fn record_state(
        &self,
        operation: Operation,
        name: &str,
        files: &InstanceFiles,
        state: InstanceState,
    ) -> Result<Properties, LifecycleError> {
        let mut metadata = self.read_state(operation, name, files)?;
        metadata.insert(KEY_STATE, state.to_string());
        properties::write(&files.state(), &metadata).map_err(|source| {
            LifecycleError::Properties {
                operation,
                action: PropertiesAction::WriteState,
                name: name.to_owned(),
                source,
            }
        })?;
        debug!(target: LIFECYCLE_TARGET, server = name, %state, "state recorded");
        Ok(metadata)
    }

    /// Whether a session hosts the named instance.
    pub(crate) fn running(&self, operation: Operation, name: &str) -> Result<bool, LifecycleError> {
        self.sessions
            .is_running(name)
            .map_err(|source| LifecycleError::Sessions { operation, source })
    }
}

impl fmt::Debug for ServerManager {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerManager")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
