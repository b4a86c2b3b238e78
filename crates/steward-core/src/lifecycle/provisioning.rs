//! Creating and removing instances.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use steward_config::create_shared_dir;
use tracing::{debug, info, warn};

use super::error::{LifecycleError, Operation, PropertiesAction};
use super::types::{
    CreateResult, InstanceFiles, InstanceState, KEY_BRANCH, KEY_SERVER_NAME, KEY_STATE,
    KEY_VERSION, RemoveResult,
};
use super::{LIFECYCLE_TARGET, ServerManager};
use crate::fsutil;
use crate::properties::{self, Properties};
use crate::versions::{self, Branch, Version, VersionError};

impl ServerManager {
    /// Installs a new instance from a cached distribution archive.
    ///
    /// `defaults` must name the instance through `server-name`. Optional
    /// `version` and `branch` keys select the archive; they are consumed here
    /// and recorded in the state file instead of the static configuration.
    /// Without a version the newest cached one of the branch is used.
    ///
    /// With `force` an existing instance directory is kept as is and only its
    /// metadata is rewritten.
    ///
    /// # Errors
    ///
    /// Fails when the name is missing, no matching archive is cached, the
    /// instance exists without `force`, or unpacking or writing metadata fails.
    pub fn create(&self, defaults: &Properties, force: bool) -> Result<CreateResult, LifecycleError> {
        let name = defaults
            .get(KEY_SERVER_NAME)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| LifecycleError::name_required(Operation::Create))?
            .to_owned();
        LifecycleError::checked_name(Operation::Create, &name)?;
        let mut static_config = defaults.clone();
        let branch = parse_branch(Operation::Create, static_config.remove(KEY_BRANCH).as_deref())?;
        let version = self.resolve_version(branch, static_config.remove(KEY_VERSION).as_deref())?;

        let files = self.files(&name);
        if files.root().exists() {
            if !force {
                return Err(LifecycleError::AlreadyExists { name });
            }
            debug!(target: LIFECYCLE_TARGET, server = %name, "instance exists, rewriting metadata only");
        } else {
            let archive = versions::archive_path(&self.layout, branch, &version);
            unpack(&archive, files.root())?;
        }
        retire_shipped(&name, &files)?;

        let properties_error = |action, source| LifecycleError::Properties {
            operation: Operation::Create,
            action,
            name: name.clone(),
            source,
        };
        properties::write(&files.defaults(), &static_config)
            .map_err(|source| properties_error(PropertiesAction::WriteDefaults, source))?;
        let state = Properties::from([
            (KEY_VERSION, version.to_string()),
            (KEY_BRANCH, branch.to_string()),
            (KEY_STATE, InstanceState::Created.to_string()),
        ]);
        properties::write(&files.state(), &state)
            .map_err(|source| properties_error(PropertiesAction::WriteState, source))?;

        info!(target: LIFECYCLE_TARGET, server = %name, %version, %branch, "instance created");
        Ok(CreateResult {
            server_name: name,
            version,
            branch,
            default_properties: static_config,
        })
    }

    fn resolve_version(
        &self,
        branch: Branch,
        requested: Option<&str>,
    ) -> Result<Version, LifecycleError> {
        let resolve_error = |source| LifecycleError::ResolveVersion {
            operation: Operation::Create,
            source,
        };
        let version = match requested.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.parse::<Version>().map_err(resolve_error)?,
            None => versions::latest_downloaded(&self.layout, branch)
                .map_err(resolve_error)?
                .ok_or(LifecycleError::NothingDownloaded { branch })?,
        };
        if !versions::archive_path(&self.layout, branch, &version).is_file() {
            return Err(LifecycleError::VersionNotDownloaded { version });
        }
        Ok(version)
    }

    /// Deletes a stopped instance together with its log.
    ///
    /// # Errors
    ///
    /// Fails when the instance does not exist, is running, or cannot be
    /// deleted.
    pub fn remove(&self, name: &str) -> Result<RemoveResult, LifecycleError> {
        let files = self.existing(Operation::Remove, name)?;
        if self.running(Operation::Remove, name)? {
            return Err(LifecycleError::Running {
                operation: Operation::Remove,
                name: name.to_owned(),
            });
        }
        fsutil::remove_tree(files.root()).map_err(|source| LifecycleError::RemoveTree {
            name: name.to_owned(),
            source,
        })?;
        let log = self.layout.log_file(name);
        match fs::remove_file(&log) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(target: LIFECYCLE_TARGET, server = name, path = %log.display(), %error, "log not removed");
            }
        }
        info!(target: LIFECYCLE_TARGET, server = name, "instance removed");
        Ok(RemoveResult {
            server_name: name.to_owned(),
            state: "removed",
        })
    }
}

pub(super) fn parse_branch(
    operation: Operation,
    value: Option<&str>,
) -> Result<Branch, LifecycleError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(Branch::default()),
        Some(value) => value
            .parse::<Branch>()
            .map_err(|_| LifecycleError::ResolveVersion {
                operation,
                source: VersionError::Invalid {
                    value: value.to_owned(),
                },
            }),
    }
}

fn unpack(archive: &Path, target: &Path) -> Result<(), LifecycleError> {
    let unpack_error = |source| LifecycleError::Unpack {
        archive: archive.to_path_buf(),
        target: target.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(unpack_error)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|error| unpack_error(io::Error::other(error)))?;
    create_shared_dir(target).map_err(|error| unpack_error(io::Error::other(error)))?;
    zip.extract(target)
        .map_err(|error| unpack_error(io::Error::other(error)))?;
    fsutil::widen_tree(target).map_err(unpack_error)?;
    debug!(
        target: LIFECYCLE_TARGET,
        archive = %archive.display(),
        entries = zip.len(),
        "archive unpacked"
    );
    Ok(())
}

/// Moves the shipped configuration out of the way of the materialized one.
///
/// Only the first rename counts; later calls keep the pristine copy.
fn retire_shipped(name: &str, files: &InstanceFiles) -> Result<(), LifecycleError> {
    let shipped = files.shipped();
    let live = files.live();
    if shipped.exists() || !live.exists() {
        return Ok(());
    }
    fs::rename(&live, &shipped).map_err(|source| LifecycleError::RenameShipped {
        name: name.to_owned(),
        source,
    })
}
