//! Reinstalling an instance at another version.
//!
//! The instance directory is moved into a hidden staging directory below the
//! servers root, a fresh instance is created under the original name and the
//! worlds, player files, live tunables and lifecycle state are carried over.
//! A failure after staging leaves the previous installation in the staging
//! directory and names it in the error; nothing is rolled back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::error::{
    LifecycleError, Operation, PropertiesAction, UpdateFailure, UpdateStep,
};
use super::provisioning::parse_branch;
use super::types::{
    CARRIED_FILES, InstanceFiles, InstanceState, KEY_BRANCH, KEY_SERVER_NAME, KEY_STATE,
    KEY_VERSION, LIVE_FILE, UpdateResult, UpdateState, WORLDS_DIR,
};
use super::{LIFECYCLE_TARGET, ServerManager};
use crate::fsutil;
use crate::properties::{self, Properties};
use crate::versions::{self, Branch, Version};

impl ServerManager {
    /// Reinstalls a stopped instance at `target`, or at the current online
    /// version of its branch.
    ///
    /// Installing an older version requires `force`. An instance already at
    /// the target version is left untouched.
    ///
    /// # Errors
    ///
    /// Fails when the instance is missing or running, its metadata is
    /// unreadable, the target cannot be resolved, a downgrade is refused, or
    /// any step of the reinstallation fails.
    pub fn update(
        &self,
        name: &str,
        target: Option<&str>,
        force: bool,
    ) -> Result<UpdateResult, LifecycleError> {
        let files = self.existing(Operation::Update, name)?;
        if self.running(Operation::Update, name)? {
            return Err(LifecycleError::Running {
                operation: Operation::Update,
                name: name.to_owned(),
            });
        }
        let metadata = self.read_state(Operation::Update, name, &files)?;
        let resolve_error = |source| LifecycleError::ResolveVersion {
            operation: Operation::Update,
            source,
        };
        let current: Version = metadata
            .get(KEY_VERSION)
            .unwrap_or_default()
            .parse()
            .map_err(resolve_error)?;
        let branch = parse_branch(Operation::Update, metadata.get(KEY_BRANCH))?;
        let wanted = match target.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.parse::<Version>().map_err(resolve_error)?,
            None => versions::online_version(self.catalog(), branch)
                .map_err(|source| LifecycleError::OnlineVersion { source })?,
        };

        if wanted == current {
            debug!(target: LIFECYCLE_TARGET, server = name, version = %current, "already up to date");
            return Ok(UpdateResult {
                server_name: name.to_owned(),
                branch,
                previous_version: current,
                version: wanted,
                state: UpdateState::UpToDate,
            });
        }
        if wanted < current && !force {
            return Err(LifecycleError::Downgrade {
                name: name.to_owned(),
                current,
                target: wanted,
            });
        }

        let mut defaults = properties::read(&files.defaults()).map_err(|source| {
            LifecycleError::Properties {
                operation: Operation::Update,
                action: PropertiesAction::ReadDefaults,
                name: name.to_owned(),
                source,
            }
        })?;
        defaults.insert(KEY_SERVER_NAME, name);
        defaults.insert(KEY_VERSION, wanted.to_string());
        defaults.insert(KEY_BRANCH, branch.to_string());

        let previous = self.stage(name, &files)?;
        let previous_state = metadata
            .get(KEY_STATE)
            .and_then(|state| state.parse::<InstanceState>().ok());
        self.reinstall(name, branch, &wanted, &defaults, &previous, previous_state)
            .map_err(|(step, failure)| LifecycleError::UpdateStep {
                name: name.to_owned(),
                step,
                staging: previous.clone(),
                source: Box::new(failure),
            })?;

        info!(
            target: LIFECYCLE_TARGET,
            server = name,
            from = %current,
            to = %wanted,
            "instance updated"
        );
        Ok(UpdateResult {
            server_name: name.to_owned(),
            branch,
            previous_version: current,
            version: wanted,
            state: UpdateState::Updated,
        })
    }

    /// Moves the instance into a fresh hidden directory below the servers
    /// root and returns the directory now holding the old installation.
    fn stage(&self, name: &str, files: &InstanceFiles) -> Result<PathBuf, LifecycleError> {
        let servers = self.layout.servers_dir();
        let stage_error = |staging: &Path, source| LifecycleError::Stage {
            name: name.to_owned(),
            staging: staging.to_path_buf(),
            source,
        };
        let staging = tempfile::Builder::new()
            .prefix(&format!(".update-{name}-"))
            .tempdir_in(servers)
            .map_err(|source| stage_error(servers, source))?
            .keep();
        let previous = staging.join(name);
        if let Err(source) = fs::rename(files.root(), &previous) {
            if let Err(error) = fs::remove_dir(&staging) {
                debug!(target: LIFECYCLE_TARGET, path = %staging.display(), %error, "staging directory left behind");
            }
            return Err(stage_error(&staging, source));
        }
        debug!(target: LIFECYCLE_TARGET, server = name, staging = %staging.display(), "instance staged");
        Ok(previous)
    }

    fn reinstall(
        &self,
        name: &str,
        branch: Branch,
        wanted: &Version,
        defaults: &Properties,
        previous: &Path,
        previous_state: Option<InstanceState>,
    ) -> Result<(), (UpdateStep, UpdateFailure)> {
        versions::download(&self.layout, self.catalog(), branch, Some(wanted.clone()))
            .map_err(|error| (UpdateStep::Download, error.into()))?;
        self.create(defaults, false)
            .map_err(|error| (UpdateStep::Create, error.into()))?;

        let files = self.files(name);
        carry_data(previous, &files).map_err(|error| (UpdateStep::MoveData, error))?;
        merge_live(previous, &files).map_err(|error| (UpdateStep::MergeLive, error))?;
        if let Some(state) = previous_state {
            self.record_state(Operation::Update, name, &files, state)
                .map_err(|error| (UpdateStep::RestoreState, error.into()))?;
        }

        let staging = previous.parent().unwrap_or(previous);
        fsutil::remove_tree(staging).map_err(|error| (UpdateStep::Cleanup, error.into()))?;
        Ok(())
    }
}

/// Moves worlds and player files from the old installation into the new one.
fn carry_data(previous: &Path, files: &InstanceFiles) -> Result<(), UpdateFailure> {
    let old_worlds = previous.join(WORLDS_DIR);
    if old_worlds.is_dir() {
        let new_worlds = files.worlds();
        if new_worlds.exists() {
            fsutil::remove_tree(&new_worlds)?;
        }
        move_entry(&old_worlds, &new_worlds)?;
    }
    for carried in CARRIED_FILES {
        let old_file = previous.join(carried);
        if old_file.is_file() {
            move_entry(&old_file, &files.root().join(carried))?;
        }
    }
    Ok(())
}

/// Overlays the old live configuration onto the new shipped one.
fn merge_live(previous: &Path, files: &InstanceFiles) -> Result<(), UpdateFailure> {
    let old_live = previous.join(LIVE_FILE);
    if !old_live.is_file() {
        return Ok(());
    }
    let shipped = files.shipped();
    let layers: Vec<&Path> = if shipped.is_file() {
        vec![shipped.as_path(), old_live.as_path()]
    } else {
        vec![old_live.as_path()]
    };
    properties::merge(&layers, Some(&shipped))?;
    Ok(())
}

fn move_entry(from: &Path, to: &Path) -> Result<(), UpdateFailure> {
    fs::rename(from, to).map_err(|source: io::Error| UpdateFailure::Io {
        context: format!("cannot move '{}' to '{}'", from.display(), to.display()),
        source,
    })
}
