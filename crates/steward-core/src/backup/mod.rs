//! Incremental, content-addressed world backups.
//!
//! A backup is a record file `<backups>/<name>.properties` holding metadata
//! followed by one `digest=relative/path` line per world file. File content
//! lives once in the content store below the backups directory, however
//! many records reference it. Records are immutable; removing one garbage
//! collects blobs no remaining record references.
//!
//! Create, restore and remove serialise on an advisory lock so a collection
//! never races a backup that is about to reference a blob.

mod error;
mod lock;
mod store;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use steward_config::{Layout, RECORD_EXTENSION};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::{debug, info};
use walkdir::WalkDir;

pub use error::{BackupError, BackupOperation};
pub use lock::{LOCK_FILE, LockError};
pub use store::{DIGEST_LEN, is_digest};

use self::lock::StoreLock;
use self::store::{ContentStore, digest_file};
use crate::fsutil;
use crate::lifecycle::{InstanceFiles, KEY_BRANCH, KEY_LEVEL_NAME, KEY_SERVER_NAME, KEY_VERSION};
use crate::properties::{self, Properties};
use crate::session::SessionRunner;
use crate::worlds::{self, WorldError};

pub(crate) const BACKUP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::backup");

const KEY_BACKUP_NAME: &str = "backup-name";
const KEY_DATETIME: &str = "datetime";
const KEY_DESCRIPTION: &str = "description";

/// World identity marker rewritten to the target level on restore.
pub const LEVEL_MARKER: &str = "levelname.txt";

const DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");
const NAME_STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");

const DEFAULT_LOCK_TICKS: u64 = 60;

/// Parameters of a new backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupRequest {
    /// Instance owning the world.
    pub server_name: String,
    /// World to back up; defaults to the instance's only world.
    pub level_name: Option<String>,
    /// Record name; defaults to a timestamp, server and level composite.
    pub backup_name: Option<String>,
    /// Free-form note stored in the record.
    pub description: Option<String>,
    /// Replace an existing record of the same name.
    pub overwrite: bool,
    /// Gzip newly stored blobs.
    pub compress: bool,
}

impl BackupRequest {
    /// Request for the default world of `server_name`.
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Self::default()
        }
    }
}

/// Metadata of one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupSummary {
    /// Record name.
    pub backup_name: String,
    /// Instance the world was taken from.
    pub server_name: String,
    /// World that was backed up.
    pub level_name: String,
    /// Release channel of the instance at backup time.
    pub branch: String,
    /// Distribution version of the instance at backup time.
    pub version: String,
    /// UTC time the backup was taken, `YYYY-MM-DD HH:MM`.
    pub datetime: String,
    /// Optional note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of files in the backup.
    pub file_count: usize,
}

/// Outcome of a new backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateBackupResult {
    /// The stored record.
    #[serde(flatten)]
    pub summary: BackupSummary,
    /// Blobs added to the content store; the rest were already present.
    pub stored_blobs: usize,
    /// Blobs deleted because the replaced record was their last user.
    pub collected_blobs: usize,
}

/// Outcome of a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreResult {
    /// Restored record.
    pub backup_name: String,
    /// Instance the world was written to.
    pub server_name: String,
    /// World that was written.
    pub level_name: String,
    /// Number of files written.
    pub file_count: usize,
    /// Always `restored`.
    pub state: &'static str,
}

/// Outcome of removing a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoveBackupResult {
    /// Removed record.
    pub backup_name: String,
    /// Blobs deleted by the collection.
    pub collected_blobs: usize,
    /// Always `removed`.
    pub state: &'static str,
}

/// A parsed record: metadata plus the manifest in file order.
#[derive(Debug)]
struct Record {
    header: Properties,
    files: Vec<(String, String)>,
}

impl Record {
    fn read(operation: BackupOperation, path: &Path) -> Result<Self, BackupError> {
        let entries = properties::read_entries(path)
            .map_err(|source| BackupError::Record { operation, source })?;
        let mut header = Properties::new();
        let mut files = Vec::new();
        for (key, value) in entries {
            if is_digest(&key) {
                files.push((key, value));
            } else {
                header.insert(key, value);
            }
        }
        Ok(Self { header, files })
    }

    fn summary(&self, backup_name: &str) -> BackupSummary {
        let field = |key| self.header.get(key).unwrap_or_default().to_owned();
        BackupSummary {
            backup_name: backup_name.to_owned(),
            server_name: field(KEY_SERVER_NAME),
            level_name: field(KEY_LEVEL_NAME),
            branch: field(KEY_BRANCH),
            version: field(KEY_VERSION),
            datetime: field(KEY_DATETIME),
            description: self.header.get(KEY_DESCRIPTION).map(str::to_owned),
            file_count: self.files.len(),
        }
    }
}

/// Creates, restores, lists and removes world backups.
#[derive(Clone)]
pub struct BackupEngine {
    layout: Layout,
    sessions: Arc<dyn SessionRunner>,
    tick: Duration,
    lock_ticks: u64,
}

impl std::fmt::Debug for BackupEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackupEngine")
            .field("layout", &self.layout)
            .field("lock_ticks", &self.lock_ticks)
            .finish_non_exhaustive()
    }
}

impl BackupEngine {
    /// Engine over `layout`, asking `sessions` which worlds are live.
    #[must_use]
    pub fn new(layout: Layout, sessions: Arc<dyn SessionRunner>) -> Self {
        Self {
            layout,
            sessions,
            tick: Duration::from_secs(1),
            lock_ticks: DEFAULT_LOCK_TICKS,
        }
    }

    /// Waits at most `ticks` rounds of `tick` for a busy content store.
    #[must_use]
    pub fn with_lock_wait(mut self, tick: Duration, ticks: u64) -> Self {
        self.tick = tick;
        self.lock_ticks = ticks;
        self
    }

    fn store(&self) -> ContentStore {
        ContentStore::new(self.layout.content_store_dir().to_path_buf())
    }

    fn lock(&self, operation: BackupOperation) -> Result<StoreLock, BackupError> {
        fs::create_dir_all(self.layout.content_store_dir()).map_err(|source| BackupError::Io {
            operation,
            path: self.layout.content_store_dir().to_path_buf(),
            source,
        })?;
        StoreLock::acquire(self.layout.backups_dir(), self.tick, self.lock_ticks)
            .map_err(|source| BackupError::Lock { operation, source })
    }

    /// Backs up a world that is not in use.
    ///
    /// Every file is hashed; content missing from the store is copied in,
    /// optionally gzip-compressed. Byte-identical files across any number of
    /// backups are stored once.
    ///
    /// # Errors
    ///
    /// Fails when the instance or world cannot be resolved, the world is
    /// live, the name is taken without `overwrite`, or reading the world or
    /// writing the store fails.
    pub fn create(&self, request: &BackupRequest) -> Result<CreateBackupResult, BackupError> {
        const OPERATION: BackupOperation = BackupOperation::Create;
        let server = request.server_name.trim();
        if server.is_empty() {
            return Err(BackupError::Required {
                operation: OPERATION,
                field: KEY_SERVER_NAME,
            });
        }
        let level = self.resolve_level(server, request.level_name.as_deref())?;
        self.ensure_idle(OPERATION, server, &level)?;

        let files = InstanceFiles::new(self.layout.instance_dir(server));
        let state = properties::read(&files.state()).map_err(|source| BackupError::Record {
            operation: OPERATION,
            source,
        })?;
        let now = OffsetDateTime::now_utc();
        let backup_name = match request
            .backup_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            Some(name) => name.to_owned(),
            None => format!("{}_{server}_{level}", format_time(now, NAME_STAMP_FORMAT)),
        };
        validate_name(OPERATION, &backup_name)?;

        let _lock = self.lock(OPERATION)?;
        let record_path = self.layout.backup_record(&backup_name);
        let replaces = record_path.exists();
        if replaces && !request.overwrite {
            return Err(BackupError::AlreadyExists {
                backup: backup_name,
            });
        }

        let world = files.worlds().join(&level);
        let (manifest, stored_blobs) = self.store_world(&world, request.compress)?;

        let mut header = Properties::from([
            (KEY_SERVER_NAME, server.to_owned()),
            (KEY_LEVEL_NAME, level.clone()),
            (KEY_BACKUP_NAME, backup_name.clone()),
            (KEY_BRANCH, state.get(KEY_BRANCH).unwrap_or_default().to_owned()),
            (KEY_VERSION, state.get(KEY_VERSION).unwrap_or_default().to_owned()),
            (KEY_DATETIME, format_time(now, DATETIME_FORMAT)),
        ]);
        if let Some(description) = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            header.insert(KEY_DESCRIPTION, description);
        }
        let record = Record {
            header,
            files: manifest,
        };
        let lines = record.header.iter().chain(
            record
                .files
                .iter()
                .map(|(digest, path)| (digest.as_str(), path.as_str())),
        );
        properties::write_entries(&record_path, lines).map_err(|source| BackupError::Record {
            operation: OPERATION,
            source,
        })?;
        let collected_blobs = if replaces {
            self.collect_unreferenced(OPERATION)?
        } else {
            0
        };

        let summary = record.summary(&backup_name);
        info!(
            target: BACKUP_TARGET,
            backup = %backup_name,
            server,
            level = %level,
            files = summary.file_count,
            stored_blobs,
            collected_blobs,
            "backup created"
        );
        Ok(CreateBackupResult {
            summary,
            stored_blobs,
            collected_blobs,
        })
    }

    fn resolve_level(&self, server: &str, requested: Option<&str>) -> Result<String, BackupError> {
        let available =
            worlds::worlds(&self.layout, server).map_err(|source| BackupError::Instance {
                operation: BackupOperation::Create,
                name: server.to_owned(),
                source,
            })?;
        match requested.map(str::trim).filter(|value| !value.is_empty()) {
            Some(level) if available.iter().any(|world| world == level) => Ok(level.to_owned()),
            Some(level) => Err(BackupError::WorldMissing {
                name: server.to_owned(),
                level: level.to_owned(),
            }),
            None => match available.as_slice() {
                [only] => Ok(only.clone()),
                _ => Err(BackupError::AmbiguousWorld {
                    name: server.to_owned(),
                    available,
                }),
            },
        }
    }

    fn ensure_idle(
        &self,
        operation: BackupOperation,
        server: &str,
        level: &str,
    ) -> Result<(), BackupError> {
        let in_use = worlds::world_in_use(&self.layout, self.sessions.as_ref(), server, Some(level))
            .map_err(|source| BackupError::Instance {
                operation,
                name: server.to_owned(),
                source,
            })?;
        if in_use {
            return Err(BackupError::WorldInUse {
                operation,
                name: server.to_owned(),
                level: level.to_owned(),
            });
        }
        Ok(())
    }

    /// Hashes every file below `world` into the store.
    fn store_world(
        &self,
        world: &Path,
        compress: bool,
    ) -> Result<(Vec<(String, String)>, usize), BackupError> {
        let io_error = |path: &Path, source| BackupError::Io {
            operation: BackupOperation::Create,
            path: path.to_path_buf(),
            source,
        };
        let store = self.store();
        let mut manifest = Vec::new();
        let mut stored = 0;
        for entry in WalkDir::new(world).sort_by_file_name() {
            let entry = entry.map_err(|error| io_error(world, io::Error::other(error)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = relative_name(world, path)
                .ok_or_else(|| io_error(path, io::Error::from(io::ErrorKind::InvalidInput)))?;
            let digest = digest_file(path).map_err(|source| io_error(path, source))?;
            if store
                .put(path, &digest, compress)
                .map_err(|source| io_error(path, source))?
            {
                stored += 1;
            }
            manifest.push((digest, relative));
        }
        debug!(target: BACKUP_TARGET, world = %world.display(), files = manifest.len(), "world hashed");
        Ok((manifest, stored))
    }

    /// Rebuilds a world from a backup.
    ///
    /// Server and level default to those recorded in the backup. Every blob
    /// is checked before the target is touched; the previous world is then
    /// replaced as a whole. The level marker file receives the target level
    /// name.
    ///
    /// # Errors
    ///
    /// Fails when the backup or instance is missing, the target world is
    /// live, any referenced blob is missing, or writing the world fails.
    pub fn restore(
        &self,
        backup_name: &str,
        server_name: Option<&str>,
        level_name: Option<&str>,
    ) -> Result<RestoreResult, BackupError> {
        const OPERATION: BackupOperation = BackupOperation::Restore;
        let backup = self.existing_record(OPERATION, backup_name)?;
        let record = Record::read(OPERATION, &self.layout.backup_record(&backup))?;
        let pick = |given: Option<&str>, key: &'static str| {
            given
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .or_else(|| record.header.get(key))
                .map(str::to_owned)
                .filter(|value| !value.is_empty())
                .ok_or(BackupError::Required {
                    operation: OPERATION,
                    field: key,
                })
        };
        let server = pick(server_name, KEY_SERVER_NAME)?;
        let level = pick(level_name, KEY_LEVEL_NAME)?;
        let refused = |source| BackupError::Instance {
            operation: OPERATION,
            name: server.clone(),
            source,
        };
        if !fsutil::is_plain_name(&server) {
            return Err(refused(WorldError::InvalidName {
                name: server.clone(),
            }));
        }
        worlds::check_level(&level).map_err(refused)?;

        let files = InstanceFiles::new(self.layout.instance_dir(&server));
        if !files.root().is_dir() {
            return Err(BackupError::Instance {
                operation: OPERATION,
                name: server.clone(),
                source: WorldError::NotCreated { name: server },
            });
        }
        self.ensure_idle(OPERATION, &server, &level)?;

        let _lock = self.lock(OPERATION)?;
        let store = self.store();
        let missing = record
            .files
            .iter()
            .filter(|(digest, _)| !store.contains(digest))
            .count();
        if missing > 0 {
            return Err(BackupError::Corrupt { backup, missing });
        }
        let world = files.worlds().join(&level);
        let io_error = |path: &Path, source| BackupError::Io {
            operation: OPERATION,
            path: path.to_path_buf(),
            source,
        };
        let mut targets = Vec::with_capacity(record.files.len());
        for (digest, relative) in &record.files {
            let target = safe_join(&world, relative).ok_or_else(|| {
                io_error(
                    &world.join(relative),
                    io::Error::from(io::ErrorKind::InvalidData),
                )
            })?;
            targets.push((digest, relative, target));
        }

        if world.exists() {
            fsutil::remove_tree(&world).map_err(|source| BackupError::ClearWorld {
                name: server.clone(),
                level: level.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&world).map_err(|source| io_error(&world, source))?;
        for (digest, relative, target) in targets {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
            }
            store
                .copy_out(digest, &target)
                .map_err(|source| io_error(&target, source))?;
            if relative == LEVEL_MARKER {
                fs::write(&target, &level).map_err(|source| io_error(&target, source))?;
            }
        }
        fsutil::widen_tree(&world).map_err(|source| io_error(&world, source))?;

        info!(
            target: BACKUP_TARGET,
            backup = %backup,
            server = %server,
            level = %level,
            files = record.files.len(),
            "backup restored"
        );
        Ok(RestoreResult {
            backup_name: backup,
            server_name: server,
            level_name: level,
            file_count: record.files.len(),
            state: "restored",
        })
    }

    fn existing_record(
        &self,
        operation: BackupOperation,
        backup_name: &str,
    ) -> Result<String, BackupError> {
        let backup = backup_name.trim();
        if backup.is_empty() {
            return Err(BackupError::Required {
                operation,
                field: KEY_BACKUP_NAME,
            });
        }
        validate_name(operation, backup)?;
        if !self.layout.backup_record(backup).is_file() {
            return Err(BackupError::NotFound {
                operation,
                backup: backup.to_owned(),
            });
        }
        Ok(backup.to_owned())
    }

    /// Summaries of every backup, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails when the backups directory or a record cannot be read.
    pub fn list(&self) -> Result<Vec<BackupSummary>, BackupError> {
        const OPERATION: BackupOperation = BackupOperation::List;
        self.record_names(OPERATION)?
            .into_iter()
            .map(|name| {
                let record = Record::read(OPERATION, &self.layout.backup_record(&name))?;
                Ok(record.summary(&name))
            })
            .collect()
    }

    fn record_names(&self, operation: BackupOperation) -> Result<Vec<String>, BackupError> {
        let dir = self.layout.backups_dir();
        let io_error = |source| BackupError::Io {
            operation,
            path: dir.to_path_buf(),
            source,
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(io_error(error)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
                && !stem.starts_with('.')
            {
                names.push(stem.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes a backup and the blobs no other backup references.
    ///
    /// # Errors
    ///
    /// Fails when the backup does not exist, the record cannot be deleted
    /// or the remaining records cannot be read.
    pub fn remove(&self, backup_name: &str) -> Result<RemoveBackupResult, BackupError> {
        const OPERATION: BackupOperation = BackupOperation::Remove;
        let backup = self.existing_record(OPERATION, backup_name)?;
        let _lock = self.lock(OPERATION)?;
        let path = self.layout.backup_record(&backup);
        fs::remove_file(&path).map_err(|source| BackupError::Io {
            operation: OPERATION,
            path: path.clone(),
            source,
        })?;

        let collected_blobs = self.collect_unreferenced(OPERATION)?;
        info!(target: BACKUP_TARGET, backup = %backup, collected_blobs, "backup removed");
        Ok(RemoveBackupResult {
            backup_name: backup,
            collected_blobs,
            state: "removed",
        })
    }

    /// Deletes blobs that no remaining record lists.
    fn collect_unreferenced(&self, operation: BackupOperation) -> Result<usize, BackupError> {
        let mut referenced = BTreeSet::new();
        for name in self.record_names(operation)? {
            let record = Record::read(operation, &self.layout.backup_record(&name))?;
            referenced.extend(record.files.into_iter().map(|(digest, _)| digest));
        }
        self.store()
            .collect(&referenced)
            .map_err(|source| BackupError::Io {
                operation,
                path: self.layout.content_store_dir().to_path_buf(),
                source,
            })
    }
}

fn format_time(at: OffsetDateTime, format: &[BorrowedFormatItem<'_>]) -> String {
    at.format(format).unwrap_or_default()
}

/// Backup names become file names; separators and hidden names are refused.
fn validate_name(operation: BackupOperation, name: &str) -> Result<(), BackupError> {
    if !fsutil::is_plain_name(name) {
        return Err(BackupError::InvalidName {
            operation,
            backup: name.to_owned(),
        });
    }
    Ok(())
}

/// `/`-separated path of `path` below `root`.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    Some(parts?.join("/"))
}

/// Joins a recorded relative path below `root`, refusing escapes.
fn safe_join(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (joined != root).then_some(joined)
}

#[cfg(test)]
mod tests;
