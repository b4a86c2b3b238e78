//! Materializing configuration and booting sessions.

use std::ffi::OsString;
use std::fs::File;
use std::path::Path;

use steward_config::create_shared_dir;
use tracing::{debug, info, warn};

use super::error::{LifecycleError, Operation, PropertiesAction};
use super::monitoring::Readiness;
use super::types::{
    InstanceFiles, InstanceState, KEY_BRANCH, KEY_SERVER_NAME, KEY_VERSION, PORT_KEYS,
    StartResult, StartState,
};
use super::{LIFECYCLE_TARGET, ServerManager};
use crate::fsutil;
use crate::properties::{self, Properties};
use crate::session::SessionSpec;

const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

impl ServerManager {
    /// Starts an instance with per-start overrides.
    ///
    /// A live instance is left alone. Otherwise `overrides` replace the
    /// previous per-start overrides and the instance boots through
    /// [`ServerManager::start_simple`].
    ///
    /// # Errors
    ///
    /// Fails when the name is missing, the instance does not exist, a
    /// requested port is held by another live instance, or booting fails.
    pub fn start(&self, overrides: &Properties) -> Result<StartResult, LifecycleError> {
        let name = overrides
            .get(KEY_SERVER_NAME)
            .map(str::trim)
            .unwrap_or_default();
        let files = self.existing(Operation::Start, name)?;
        if self.running(Operation::Start, name)? {
            return self.already_running(Operation::Start, name, &files);
        }
        self.check_ports(name, &files, overrides)?;
        properties::write(&files.start(), overrides).map_err(|source| {
            LifecycleError::Properties {
                operation: Operation::Start,
                action: PropertiesAction::WriteStart,
                name: name.to_owned(),
                source,
            }
        })?;
        self.start_simple(name)
    }

    /// Boots an instance from its persisted configuration.
    ///
    /// The materialized configuration is regenerated when missing or older
    /// than the per-start overrides. The log is truncated, the server binary
    /// is spawned inside a named session and the log is polled until the
    /// server reports readiness. A server that never does is stopped again.
    ///
    /// # Errors
    ///
    /// Fails when the instance does not exist, the configuration cannot be
    /// materialized, spawning fails, or readiness is not reported in time.
    pub fn start_simple(&self, name: &str) -> Result<StartResult, LifecycleError> {
        let files = self.existing(Operation::StartSimple, name)?;
        if self.running(Operation::StartSimple, name)? {
            return self.already_running(Operation::StartSimple, name, &files);
        }
        materialize(name, &files)?;
        let logfile = self.reset_log(name)?;
        if let Err(error) = self.sessions.wipe() {
            warn!(target: LIFECYCLE_TARGET, %error, "session wipe failed");
        }

        let spec = SessionSpec {
            name: name.to_owned(),
            program: files.root().join(&self.config.executable),
            args: Vec::new(),
            working_dir: files.root().to_path_buf(),
            env: vec![(
                String::from(LIBRARY_PATH_VAR),
                OsString::from(files.root().as_os_str()),
            )],
            logfile,
        };
        self.sessions
            .start(&spec)
            .map_err(|source| LifecycleError::Spawn {
                name: name.to_owned(),
                source,
            })?;
        info!(target: LIFECYCLE_TARGET, server = name, "session spawned");

        let outcome = self
            .wait_until_started(name)
            .and_then(|readiness| self.settle(name, &files, readiness));
        if let Err(error) = &outcome {
            warn!(target: LIFECYCLE_TARGET, server = name, %error, "start failed, stopping session");
            if let Err(stop_error) = self.sessions.stop(name) {
                warn!(target: LIFECYCLE_TARGET, server = name, error = %stop_error, "cannot stop failed session");
            }
        }
        outcome
    }

    /// Turns the readiness of a freshly spawned session into the start result.
    fn settle(
        &self,
        name: &str,
        files: &InstanceFiles,
        readiness: Readiness,
    ) -> Result<StartResult, LifecycleError> {
        match readiness {
            Readiness::Started { ticks, log } => {
                let metadata =
                    self.record_state(Operation::StartSimple, name, files, InstanceState::Started)?;
                info!(target: LIFECYCLE_TARGET, server = name, ticks, "server started");
                Ok(StartResult {
                    server_name: name.to_owned(),
                    version: metadata.get(KEY_VERSION).map(str::to_owned),
                    branch: metadata.get(KEY_BRANCH).map(str::to_owned),
                    state: StartState::Started,
                    times: Some(ticks),
                    log: Some(log),
                })
            }
            Readiness::TimedOut => Err(LifecycleError::StartTimeout {
                name: name.to_owned(),
                ticks: self.config.start_timeout_secs,
            }),
        }
    }

    fn already_running(
        &self,
        operation: Operation,
        name: &str,
        files: &InstanceFiles,
    ) -> Result<StartResult, LifecycleError> {
        let metadata = self.read_state(operation, name, files)?;
        debug!(target: LIFECYCLE_TARGET, server = name, "already running");
        Ok(StartResult {
            server_name: name.to_owned(),
            version: metadata.get(KEY_VERSION).map(str::to_owned),
            branch: metadata.get(KEY_BRANCH).map(str::to_owned),
            state: StartState::AlreadyRunning,
            times: None,
            log: None,
        })
    }

    /// Refuses ports already bound by another live instance.
    fn check_ports(
        &self,
        name: &str,
        files: &InstanceFiles,
        overrides: &Properties,
    ) -> Result<(), LifecycleError> {
        let read_error = |source| LifecycleError::Properties {
            operation: Operation::Start,
            action: PropertiesAction::ReadLive,
            name: name.to_owned(),
            source,
        };
        let mut requested = properties::read_or_default(&files.shipped()).map_err(read_error)?;
        requested.extend_from(&properties::read_or_default(&files.defaults()).map_err(read_error)?);
        requested.extend_from(overrides);

        let live = self
            .sessions
            .list()
            .map_err(|source| LifecycleError::Sessions {
                operation: Operation::Start,
                source,
            })?;
        for other in live.iter().filter(|other| other.as_str() != name) {
            let other_live = self.files(other).live();
            let Ok(bound) = properties::read(&other_live) else {
                continue;
            };
            for key in PORT_KEYS {
                if let (Some(port), Some(taken)) = (requested.get(key), bound.get(key))
                    && port == taken
                {
                    return Err(LifecycleError::PortInUse {
                        port: port.to_owned(),
                        holder: other.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Truncates the instance log so the next replay sees only the new run.
    fn reset_log(&self, name: &str) -> Result<std::path::PathBuf, LifecycleError> {
        let logfile = self.layout.log_file(name);
        let reset_error = |source| LifecycleError::ResetLog {
            path: logfile.clone(),
            source,
        };
        create_shared_dir(self.layout.logs_dir())
            .map_err(|error| reset_error(std::io::Error::other(error)))?;
        File::create(&logfile).map_err(reset_error)?;
        fsutil::widen_file(&logfile).map_err(reset_error)?;
        Ok(logfile)
    }
}

/// Regenerates `server.properties` when missing or older than the overrides.
///
/// Precedence, lowest first: shipped, static, per-start.
fn materialize(name: &str, files: &InstanceFiles) -> Result<(), LifecycleError> {
    let live = files.live();
    let start = files.start();
    let stale = match (properties::modified(&live), properties::modified(&start)) {
        (None, _) => true,
        (Some(live_time), Some(start_time)) => start_time > live_time,
        (Some(_), None) => false,
    };
    if !stale {
        return Ok(());
    }
    let shipped = files.shipped();
    let defaults = files.defaults();
    let layers: Vec<&Path> = [shipped.as_path(), defaults.as_path(), start.as_path()]
        .into_iter()
        .filter(|layer| layer.is_file())
        .collect();
    let merged = properties::merge(&layers, Some(&live)).map_err(|source| {
        LifecycleError::Properties {
            operation: Operation::StartSimple,
            action: PropertiesAction::Materialize,
            name: name.to_owned(),
            source,
        }
    })?;
    debug!(target: LIFECYCLE_TARGET, server = name, entries = merged.len(), "configuration materialized");
    Ok(())
}
