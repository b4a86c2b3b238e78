//! Player registry fed by connect and disconnect events.
//!
//! The log parser reports every play session it replays to a
//! [`PlayerRegistry`]. Because the whole log is replayed on each query, every
//! registry update must be idempotent: an event that is not newer than the
//! player's last-seen time is acknowledged as [`PlayerState::UpToDate`] and
//! changes nothing.
//!
//! [`JsonPlayerRegistry`] persists players to `player.json` in the servers
//! directory and also maintains each instance's `permissions.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing::{debug, warn};

use crate::error::Coded;

const PLAYERS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::players");

/// File name of the registry below the servers directory.
pub const PLAYER_FILE: &str = "player.json";
/// File name of the per-instance permission list.
pub const PERMISSIONS_FILE: &str = "permissions.json";

const LAST_SEEN_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// One known player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Player {
    /// Gamertag.
    pub name: String,
    /// Stable account identifier.
    pub xuid: String,
    /// Accumulated play time in seconds.
    #[serde(default)]
    pub playtime: u64,
    /// End of the most recently recorded event, `YYYY-MM-DD hh:mm:ss`.
    #[serde(default)]
    pub last_seen: Option<String>,
}

impl Player {
    fn last_seen_at(&self) -> Option<PrimitiveDateTime> {
        self.last_seen
            .as_deref()
            .and_then(|text| PrimitiveDateTime::parse(text, LAST_SEEN_FORMAT).ok())
    }
}

/// Outcome category of a registry update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PlayerState {
    /// The player was not known before.
    Added,
    /// The player was already registered.
    AlreadyExists,
    /// The record changed.
    Updated,
    /// The event was not newer than the record.
    UpToDate,
    /// The entry was deleted.
    Removed,
}

/// Result of a registry update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlayerUpdate {
    /// Gamertag.
    pub name: String,
    /// Account identifier, when known.
    pub xuid: Option<String>,
    /// What happened.
    pub state: PlayerState,
}

/// Permission levels understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Can look around but not build.
    Visitor,
    /// Regular player.
    Member,
    /// Can run admin commands.
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PermissionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    xuid: String,
    permission: Permission,
}

/// Result of a permission update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PermissionUpdate {
    /// Instance whose permission list changed.
    pub server_name: String,
    /// Gamertag.
    pub player_name: String,
    /// New permission, `None` when removed.
    pub permission: Option<Permission>,
    /// What happened.
    pub state: PlayerState,
}

/// Errors raised by the player registry.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The registry file could not be read.
    #[error("cannot read player registry '{path}': {source}")]
    Read {
        /// Registry file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The registry file is not valid JSON.
    #[error("cannot parse player registry '{path}': {source}")]
    Parse {
        /// Registry file.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The registry file could not be written.
    #[error("cannot write player registry '{path}': {source}")]
    Write {
        /// Registry file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A player name is required.
    #[error("\"user-name\" is required")]
    NameRequired,
    /// A player identifier is required.
    #[error("\"xuid\" is required")]
    XuidRequired,
    /// The player is not registered.
    #[error("player '{name}' is unknown")]
    Unknown {
        /// Gamertag.
        name: String,
    },
    /// The instance does not exist.
    #[error("server with this name '{name}' does not exist")]
    ServerMissing {
        /// Instance name.
        name: String,
    },
    /// The permission list could not be read.
    #[error("cannot read permission list '{path}': {source}")]
    ReadPermissions {
        /// Permission file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The permission list is not valid JSON.
    #[error("cannot parse permission list '{path}': {source}")]
    ParsePermissions {
        /// Permission file.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The permission list could not be written.
    #[error("cannot write permission list '{path}': {source}")]
    WritePermissions {
        /// Permission file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl Coded for PlayerError {
    fn code(&self) -> u16 {
        match self {
            Self::Read { .. } => 1511,
            Self::Parse { .. } => 1512,
            Self::Write { .. } => 1513,
            Self::NameRequired => 1521,
            Self::XuidRequired => 1522,
            Self::Unknown { .. } => 1535,
            Self::ServerMissing { .. } => 1554,
            Self::ReadPermissions { .. } => 1555,
            Self::ParsePermissions { .. } => 1556,
            Self::WritePermissions { .. } => 1558,
        }
    }
}

/// Receives play-session events replayed from server logs.
pub trait PlayerRegistry: Send + Sync {
    /// A player joined at `at`; unknown players with an `xuid` are added.
    fn session_started(
        &self,
        name: &str,
        xuid: Option<&str>,
        at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError>;

    /// A player left at `at`; play time since the last event is accumulated.
    fn session_ended(&self, name: &str, at: PrimitiveDateTime)
    -> Result<PlayerUpdate, PlayerError>;

    /// Looks a player up by gamertag.
    fn lookup(&self, name: &str) -> Result<Option<Player>, PlayerError>;
}

/// Registry that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

impl PlayerRegistry for NoopRegistry {
    fn session_started(
        &self,
        name: &str,
        xuid: Option<&str>,
        _at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError> {
        Ok(PlayerUpdate {
            name: name.to_owned(),
            xuid: xuid.map(str::to_owned),
            state: PlayerState::UpToDate,
        })
    }

    fn session_ended(
        &self,
        name: &str,
        _at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError> {
        Ok(PlayerUpdate {
            name: name.to_owned(),
            xuid: None,
            state: PlayerState::UpToDate,
        })
    }

    fn lookup(&self, _name: &str) -> Result<Option<Player>, PlayerError> {
        Ok(None)
    }
}

/// Registry persisted as a JSON list.
#[derive(Debug)]
pub struct JsonPlayerRegistry {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonPlayerRegistry {
    /// Registry stored in `player.json` below `servers_dir`.
    #[must_use]
    pub fn in_dir(servers_dir: &Path) -> Self {
        Self::at(servers_dir.join(PLAYER_FILE))
    }

    /// Registry stored at an explicit path.
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    /// Every registered player.
    ///
    /// # Errors
    ///
    /// Fails when the registry file exists but cannot be read or decoded.
    pub fn known(&self) -> Result<Vec<Player>, PlayerError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.load()
    }

    /// Registers a player unless the identifier is already known.
    ///
    /// # Errors
    ///
    /// Fails on empty input or when the registry cannot be read or written.
    pub fn add(&self, name: &str, xuid: &str) -> Result<PlayerUpdate, PlayerError> {
        if name.trim().is_empty() {
            return Err(PlayerError::NameRequired);
        }
        if xuid.trim().is_empty() {
            return Err(PlayerError::XuidRequired);
        }
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut players = self.load()?;
        let state = insert_player(&mut players, name, xuid);
        if state == PlayerState::Added {
            self.store(&players)?;
        }
        Ok(PlayerUpdate {
            name: name.to_owned(),
            xuid: Some(xuid.to_owned()),
            state,
        })
    }

    /// Marks the start of a play session.
    ///
    /// # Errors
    ///
    /// Fails when the player is unknown or the registry cannot be persisted.
    pub fn start_playtime(
        &self,
        name: &str,
        at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError> {
        self.touch(name, at, false)
    }

    /// Marks the end of a play session and accumulates play time.
    ///
    /// # Errors
    ///
    /// Fails when the player is unknown or the registry cannot be persisted.
    pub fn stop_playtime(
        &self,
        name: &str,
        at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError> {
        self.touch(name, at, true)
    }

    /// Grants, changes or (with `None`) revokes a permission on an instance.
    ///
    /// A missing `permissions.json` is treated as an empty list.
    ///
    /// # Errors
    ///
    /// Fails when the instance or player is unknown or either JSON file cannot
    /// be read or written.
    pub fn update_permission(
        &self,
        instance_dir: &Path,
        name: &str,
        permission: Option<Permission>,
    ) -> Result<PermissionUpdate, PlayerError> {
        if name.trim().is_empty() {
            return Err(PlayerError::NameRequired);
        }
        let server_name = instance_dir
            .file_name()
            .map(|file| file.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !instance_dir.is_dir() {
            return Err(PlayerError::ServerMissing { name: server_name });
        }
        let xuid = self
            .lookup(name)?
            .map(|player| player.xuid)
            .ok_or_else(|| PlayerError::Unknown {
                name: name.to_owned(),
            })?;

        let path = instance_dir.join(PERMISSIONS_FILE);
        let mut entries = read_permissions(&path)?;
        let state = apply_permission(&mut entries, name, &xuid, permission);
        if state != PlayerState::UpToDate {
            let payload = serde_json::to_vec_pretty(&entries).map_err(|source| {
                PlayerError::WritePermissions {
                    path: path.clone(),
                    source: io::Error::other(source),
                }
            })?;
            crate::fsutil::atomic_write(&path, &payload).map_err(|source| {
                PlayerError::WritePermissions {
                    path: path.clone(),
                    source,
                }
            })?;
        }
        debug!(
            target: PLAYERS_TARGET,
            server = %server_name,
            player = name,
            %state,
            "permission updated"
        );
        Ok(PermissionUpdate {
            server_name,
            player_name: name.to_owned(),
            permission,
            state,
        })
    }

    fn touch(
        &self,
        name: &str,
        at: PrimitiveDateTime,
        accumulate: bool,
    ) -> Result<PlayerUpdate, PlayerError> {
        if name.trim().is_empty() {
            return Err(PlayerError::NameRequired);
        }
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut players = self.load()?;
        let Some(player) = players.iter_mut().find(|player| player.name == name) else {
            return Err(PlayerError::Unknown {
                name: name.to_owned(),
            });
        };
        let last_seen = player.last_seen_at();
        if last_seen.is_some_and(|seen| seen >= at) {
            return Ok(PlayerUpdate {
                name: player.name.clone(),
                xuid: Some(player.xuid.clone()),
                state: PlayerState::UpToDate,
            });
        }
        if accumulate && let Some(seen) = last_seen {
            let elapsed = u64::try_from((at - seen).whole_seconds()).unwrap_or(0);
            player.playtime = player.playtime.saturating_add(elapsed);
        }
        player.last_seen = at.format(LAST_SEEN_FORMAT).ok();
        let update = PlayerUpdate {
            name: player.name.clone(),
            xuid: Some(player.xuid.clone()),
            state: PlayerState::Updated,
        };
        self.store(&players)?;
        Ok(update)
    }

    fn load(&self) -> Result<Vec<Player>, PlayerError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PlayerError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| PlayerError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, players: &[Player]) -> Result<(), PlayerError> {
        let map_err = |source| PlayerError::Write {
            path: self.path.clone(),
            source,
        };
        let payload = serde_json::to_vec_pretty(players).map_err(|source| map_err(io::Error::other(source)))?;
        crate::fsutil::atomic_write(&self.path, &payload).map_err(map_err)
    }
}

fn insert_player(players: &mut Vec<Player>, name: &str, xuid: &str) -> PlayerState {
    if players.iter().any(|player| player.xuid == xuid) {
        return PlayerState::AlreadyExists;
    }
    players.push(Player {
        name: name.to_owned(),
        xuid: xuid.to_owned(),
        playtime: 0,
        last_seen: None,
    });
    PlayerState::Added
}

fn read_permissions(path: &Path) -> Result<Vec<PermissionEntry>, PlayerError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PlayerError::ReadPermissions {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| PlayerError::ParsePermissions {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_permission(
    entries: &mut Vec<PermissionEntry>,
    name: &str,
    xuid: &str,
    permission: Option<Permission>,
) -> PlayerState {
    let position = entries
        .iter()
        .position(|entry| entry.name.as_deref() == Some(name) || entry.xuid == xuid);
    match (position, permission) {
        (Some(index), None) => {
            entries.remove(index);
            PlayerState::Removed
        }
        (None, None) => PlayerState::UpToDate,
        (Some(index), Some(permission)) => {
            let Some(entry) = entries.get_mut(index) else {
                return PlayerState::UpToDate;
            };
            if entry.permission == permission {
                PlayerState::UpToDate
            } else {
                entry.permission = permission;
                entry.name = Some(name.to_owned());
                PlayerState::Updated
            }
        }
        (None, Some(permission)) => {
            entries.push(PermissionEntry {
                name: Some(name.to_owned()),
                xuid: xuid.to_owned(),
                permission,
            });
            PlayerState::Added
        }
    }
}

impl PlayerRegistry for JsonPlayerRegistry {
    fn session_started(
        &self,
        name: &str,
        xuid: Option<&str>,
        at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError> {
        if let Some(xuid) = xuid {
            let added = self.add(name, xuid)?;
            if added.state == PlayerState::Added {
                debug!(target: PLAYERS_TARGET, player = name, xuid, "player registered");
            }
        }
        match self.start_playtime(name, at) {
            Err(PlayerError::Unknown { .. }) => {
                warn!(
                    target: PLAYERS_TARGET,
                    player = name,
                    "play session of unregistered player ignored"
                );
                Ok(PlayerUpdate {
                    name: name.to_owned(),
                    xuid: None,
                    state: PlayerState::UpToDate,
                })
            }
            other => other,
        }
    }

    fn session_ended(
        &self,
        name: &str,
        at: PrimitiveDateTime,
    ) -> Result<PlayerUpdate, PlayerError> {
        match self.stop_playtime(name, at) {
            Err(PlayerError::Unknown { .. }) => Ok(PlayerUpdate {
                name: name.to_owned(),
                xuid: None,
                state: PlayerState::UpToDate,
            }),
            other => other,
        }
    }

    fn lookup(&self, name: &str) -> Result<Option<Player>, PlayerError> {
        Ok(self
            .known()?
            .into_iter()
            .find(|player| player.name == name))
    }
}

#[cfg(test)]
mod tests;
