//! Derives the on-disk layout shared by every component.
//!
//! Instances, logs, cached downloads and backups live in separate roots. The
//! lifecycle, backup and world modules only ever address files through a
//! [`Layout`] so the directory conventions stay in one place.

use std::fs::{self, DirBuilder};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Name of the content store directory below the backups root.
pub const CONTENT_STORE_DIR: &str = "incremental";

/// Extension used by backup records.
pub const RECORD_EXTENSION: &str = "properties";

/// Permission bits applied to every directory the toolkit creates.
#[cfg(unix)]
pub const SHARED_MODE: u32 = 0o777;

/// Canonical paths for all persistent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    downloads_dir: PathBuf,
    servers_dir: PathBuf,
    logs_dir: PathBuf,
    backups_dir: PathBuf,
    content_store_dir: PathBuf,
}

impl Layout {
    /// Derives the layout from the shared configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.downloads_dir.clone(),
            config.servers_dir.clone(),
            config.logs_dir.clone(),
            config.backups_dir.clone(),
        )
    }

    /// Places every root below a single directory; used by tests and sandboxes.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self::new(
            root.join("downloaded_server"),
            root.join("server"),
            root.join("logs"),
            root.join("backups"),
        )
    }

    fn new(
        downloads_dir: PathBuf,
        servers_dir: PathBuf,
        logs_dir: PathBuf,
        backups_dir: PathBuf,
    ) -> Self {
        let content_store_dir = backups_dir.join(CONTENT_STORE_DIR);
        Self {
            downloads_dir,
            servers_dir,
            logs_dir,
            backups_dir,
            content_store_dir,
        }
    }

    /// Creates every root directory that does not exist yet.
    pub fn prepare(&self) -> Result<(), LayoutError> {
        for directory in [
            &self.downloads_dir,
            &self.servers_dir,
            &self.logs_dir,
            &self.backups_dir,
            &self.content_store_dir,
        ] {
            create_shared_dir(directory)?;
        }
        Ok(())
    }

    /// Directory caching downloaded distribution archives.
    pub fn downloads_dir(&self) -> &Path {
        self.downloads_dir.as_path()
    }

    /// Directory holding one subdirectory per instance.
    pub fn servers_dir(&self) -> &Path {
        self.servers_dir.as_path()
    }

    /// Directory holding one log file per instance.
    pub fn logs_dir(&self) -> &Path {
        self.logs_dir.as_path()
    }

    /// Directory holding backup records.
    pub fn backups_dir(&self) -> &Path {
        self.backups_dir.as_path()
    }

    /// Directory holding content-addressed blobs.
    pub fn content_store_dir(&self) -> &Path {
        self.content_store_dir.as_path()
    }

    /// Directory of the named instance.
    #[must_use]
    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.servers_dir.join(name)
    }

    /// Log file of the named instance.
    #[must_use]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.logs_dir.join(name)
    }

    /// Record file of the named backup.
    #[must_use]
    pub fn backup_record(&self, backup_name: &str) -> PathBuf {
        self.backups_dir
            .join(format!("{backup_name}.{RECORD_EXTENSION}"))
    }

    /// Blob path for a content digest.
    #[must_use]
    pub fn blob(&self, digest: &str) -> PathBuf {
        self.content_store_dir.join(digest)
    }
}

/// Creates a directory tree and widens its permissions for companion tooling.
pub fn create_shared_dir(path: &Path) -> Result<(), LayoutError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(SHARED_MODE);
    }
    builder
        .create(path)
        .map_err(|source| LayoutError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // The process umask masks the builder mode.
        fs::set_permissions(path, fs::Permissions::from_mode(SHARED_MODE)).map_err(|source| {
            LayoutError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

/// Errors raised while preparing the directory layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Creating a root directory failed.
    #[error("failed to prepare directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
