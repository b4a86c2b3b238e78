//! Error surface of backup operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::lock::LockError;
use crate::error::Coded;
use crate::fsutil::RemoveTreeError;
use crate::properties::PropertiesError;
use crate::worlds::WorldError;

/// Backup operation that raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BackupOperation {
    /// Taking a backup.
    Create,
    /// Restoring a backup.
    Restore,
    /// Enumerating backups.
    List,
    /// Deleting a backup.
    Remove,
}

impl BackupOperation {
    const fn base(self) -> u16 {
        match self {
            Self::Create => 2010,
            Self::Restore => 2020,
            Self::List => 2030,
            Self::Remove => 2040,
        }
    }
}

/// Errors raised by the backup engine.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A required input was empty.
    #[error("\"{field}\" is required")]
    Required {
        /// Operation being attempted.
        operation: BackupOperation,
        /// Missing field.
        field: &'static str,
    },
    /// The backup name cannot be used as a file name.
    #[error("invalid backup name '{backup}'")]
    InvalidName {
        /// Operation being attempted.
        operation: BackupOperation,
        /// Offending name.
        backup: String,
    },
    /// The instance or its worlds could not be resolved.
    #[error("cannot resolve worlds of server '{name}'")]
    Instance {
        /// Operation being attempted.
        operation: BackupOperation,
        /// Instance name.
        name: String,
        /// The world lookup failure.
        #[source]
        source: WorldError,
    },
    /// The instance has no single world to pick by default.
    #[error("server '{name}' has {} worlds; \"level-name\" is required", available.len())]
    AmbiguousWorld {
        /// Instance name.
        name: String,
        /// Worlds found.
        available: Vec<String>,
    },
    /// The named world does not exist.
    #[error("world '{level}' of server '{name}' does not exist")]
    WorldMissing {
        /// Instance name.
        name: String,
        /// Level name.
        level: String,
    },
    /// The world belongs to a live instance.
    #[error("world '{level}' of server '{name}' is in use")]
    WorldInUse {
        /// Operation being attempted.
        operation: BackupOperation,
        /// Instance name.
        name: String,
        /// Level name.
        level: String,
    },
    /// A backup of that name already exists.
    #[error("backup '{backup}' already exists")]
    AlreadyExists {
        /// Backup name.
        backup: String,
    },
    /// No backup of that name exists.
    #[error("backup '{backup}' does not exist")]
    NotFound {
        /// Operation being attempted.
        operation: BackupOperation,
        /// Backup name.
        backup: String,
    },
    /// Blobs referenced by the backup are missing from the content store.
    #[error("backup '{backup}' is corrupt: {missing} referenced files are missing")]
    Corrupt {
        /// Backup name.
        backup: String,
        /// Number of missing blobs.
        missing: usize,
    },
    /// A record or instance metadata file could not be read or written.
    #[error("cannot access backup metadata")]
    Record {
        /// Operation being attempted.
        operation: BackupOperation,
        /// The property file failure.
        #[source]
        source: PropertiesError,
    },
    /// Reading world files or the content store failed.
    #[error("backup I/O failed on '{path}': {source}")]
    Io {
        /// Operation being attempted.
        operation: BackupOperation,
        /// Path being processed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The content store lock could not be taken.
    #[error("cannot lock the content store")]
    Lock {
        /// Operation being attempted.
        operation: BackupOperation,
        /// The lock failure.
        #[source]
        source: LockError,
    },
    /// The previous world could not be cleared before a restore.
    #[error("cannot clear world '{level}' of server '{name}'")]
    ClearWorld {
        /// Instance name.
        name: String,
        /// Level name.
        level: String,
        /// The removal failure.
        #[source]
        source: RemoveTreeError,
    },
}

impl Coded for BackupError {
    fn code(&self) -> u16 {
        match self {
            Self::InvalidName { operation, .. } => operation.base(),
            Self::Required { operation, .. } => operation.base() + 1,
            Self::Instance { operation, .. } => operation.base() + 2,
            Self::AmbiguousWorld { .. } => 2013,
            Self::WorldMissing { .. } => 2014,
            Self::NotFound { operation, .. } => operation.base() + 3,
            Self::Corrupt { .. } => 2024,
            Self::WorldInUse { operation, .. } => operation.base() + 5,
            Self::Record { operation, .. } => operation.base() + 6,
            Self::Io { operation, .. } => operation.base() + 7,
            Self::Lock { operation, .. } => operation.base() + 8,
            Self::AlreadyExists { .. } => 2019,
            Self::ClearWorld { .. } => 2029,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::Instance { source, .. } => Some(source),
            Self::Record { source, .. } => Some(source),
            Self::Lock { source, .. } => Some(source),
            Self::ClearWorld { source, .. } => Some(source),
            _ => None,
        }
    }
}
