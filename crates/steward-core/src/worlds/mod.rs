//! World directories of an instance.
//!
//! Worlds live in `<instance>/worlds/<level>`. A world is in use when its
//! instance is live and it is the level named by the instance's effective
//! `level-name`.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use steward_config::Layout;
use thiserror::Error;
use tracing::info;

use crate::error::Coded;
use crate::fsutil::{self, RemoveTreeError};
use crate::lifecycle::{InstanceFiles, KEY_LEVEL_NAME};
use crate::properties::{self, PropertiesError};
use crate::session::{SessionError, SessionRunner};

const WORLDS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worlds");

/// Errors raised by world queries and removal.
#[derive(Debug, Error)]
pub enum WorldError {
    /// The instance name was empty.
    #[error("\"server-name\" is required")]
    NameRequired,
    /// The worlds directory could not be listed.
    #[error("cannot list worlds in '{path}': {source}")]
    List {
        /// Worlds directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The instance name would resolve outside the servers directory.
    #[error("server name '{name}' must not contain separators or start with a dot")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// The instance does not exist.
    #[error("server '{name}' does not exist")]
    NotCreated {
        /// Instance name.
        name: String,
    },
    /// The effective configuration could not be read.
    #[error("cannot read configuration of server '{name}'")]
    ReadProperties {
        /// Instance name.
        name: String,
        /// The read failure.
        #[source]
        source: PropertiesError,
    },
    /// No configuration names a level.
    #[error("server '{name}' has no level-name configured")]
    NoLevelName {
        /// Instance name.
        name: String,
    },
    /// The level name was empty.
    #[error("\"level-name\" is required")]
    LevelRequired,
    /// The level name would resolve outside the worlds directory.
    #[error("level name '{level}' must not contain separators or start with a dot")]
    InvalidLevel {
        /// Level name.
        level: String,
    },
    /// The world directory does not exist.
    #[error("world '{level}' of server '{name}' does not exist")]
    Missing {
        /// Instance name.
        name: String,
        /// Level name.
        level: String,
    },
    /// The world belongs to a live instance.
    #[error("world '{level}' of server '{name}' is in use")]
    InUse {
        /// Instance name.
        name: String,
        /// Level name.
        level: String,
    },
    /// Deleting the world failed.
    #[error("cannot remove world '{level}' of server '{name}'")]
    Remove {
        /// Instance name.
        name: String,
        /// Level name.
        level: String,
        /// The removal failure.
        #[source]
        source: RemoveTreeError,
    },
    /// Liveness could not be determined.
    #[error("cannot query sessions for server '{name}'")]
    Session {
        /// Instance name.
        name: String,
        /// The session manager failure.
        #[source]
        source: SessionError,
    },
}

impl Coded for WorldError {
    fn code(&self) -> u16 {
        match self {
            Self::NameRequired => 3011,
            Self::List { .. } => 3012,
            Self::NotCreated { .. } => 3021,
            Self::InvalidName { .. } => 3022,
            Self::InvalidLevel { .. } => 3031,
            Self::ReadProperties { .. } => 3023,
            Self::NoLevelName { .. } => 3024,
            Self::LevelRequired => 3032,
            Self::Missing { .. } => 3033,
            Self::InUse { .. } => 3034,
            Self::Remove { .. } => 3035,
            Self::Session { .. } => 3042,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::ReadProperties { source, .. } => Some(source),
            Self::Remove { source, .. } => Some(source),
            Self::Session { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Refuses level names that would leave the worlds directory.
pub(crate) fn check_level(level: &str) -> Result<(), WorldError> {
    if level.trim().is_empty() {
        return Err(WorldError::LevelRequired);
    }
    if !fsutil::is_plain_name(level) {
        return Err(WorldError::InvalidLevel {
            level: level.to_owned(),
        });
    }
    Ok(())
}

/// Result of removing a world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoveWorldResult {
    /// Instance name.
    pub server_name: String,
    /// Removed level.
    pub level_name: String,
    /// Always `removed`.
    pub state: &'static str,
}

fn instance(layout: &Layout, name: &str) -> Result<InstanceFiles, WorldError> {
    if name.trim().is_empty() {
        return Err(WorldError::NameRequired);
    }
    if !fsutil::is_plain_name(name) {
        return Err(WorldError::InvalidName {
            name: name.to_owned(),
        });
    }
    let files = InstanceFiles::new(layout.instance_dir(name));
    if !files.root().is_dir() {
        return Err(WorldError::NotCreated {
            name: name.to_owned(),
        });
    }
    Ok(files)
}

/// Names of the worlds of an instance, sorted.
///
/// # Errors
///
/// Fails when the instance does not exist or its worlds cannot be listed.
pub fn worlds(layout: &Layout, name: &str) -> Result<Vec<String>, WorldError> {
    let files = instance(layout, name)?;
    let path = files.worlds();
    fsutil::subdirectories(&path).map_err(|source| WorldError::List { path, source })
}

/// Level named by the effective configuration.
///
/// The materialized configuration wins; before the first start the static
/// configuration and then the shipped one are consulted.
///
/// # Errors
///
/// Fails when the instance does not exist, a configuration file is
/// unreadable or no file names a level.
pub fn current_world(layout: &Layout, name: &str) -> Result<String, WorldError> {
    let files = instance(layout, name)?;
    for candidate in [files.live(), files.defaults(), files.shipped()] {
        let found = properties::read_or_default(&candidate).map_err(|source| {
            WorldError::ReadProperties {
                name: name.to_owned(),
                source,
            }
        })?;
        if let Some(level) = found.get(KEY_LEVEL_NAME)
            && !level.is_empty()
        {
            return Ok(level.to_owned());
        }
    }
    Err(WorldError::NoLevelName {
        name: name.to_owned(),
    })
}

/// Whether `level` (default: the current world) is held by a live instance.
///
/// # Errors
///
/// Fails when liveness or the current world cannot be determined.
pub fn world_in_use(
    layout: &Layout,
    sessions: &dyn SessionRunner,
    name: &str,
    level: Option<&str>,
) -> Result<bool, WorldError> {
    instance(layout, name)?;
    let running = sessions
        .is_running(name)
        .map_err(|source| WorldError::Session {
            name: name.to_owned(),
            source,
        })?;
    if !running {
        return Ok(false);
    }
    let current = current_world(layout, name)?;
    Ok(level.is_none_or(|level| level == current))
}

/// Deletes a world that is not in use.
///
/// # Errors
///
/// Fails when the world is missing, in use or cannot be deleted.
pub fn remove_world(
    layout: &Layout,
    sessions: &dyn SessionRunner,
    name: &str,
    level: &str,
) -> Result<RemoveWorldResult, WorldError> {
    let files = instance(layout, name)?;
    check_level(level)?;
    let path = files.worlds().join(level);
    if !path.is_dir() {
        return Err(WorldError::Missing {
            name: name.to_owned(),
            level: level.to_owned(),
        });
    }
    if world_in_use(layout, sessions, name, Some(level))? {
        return Err(WorldError::InUse {
            name: name.to_owned(),
            level: level.to_owned(),
        });
    }
    fsutil::remove_tree(&path).map_err(|source| WorldError::Remove {
        name: name.to_owned(),
        level: level.to_owned(),
        source,
    })?;
    info!(target: WORLDS_TARGET, server = name, level, "world removed");
    Ok(RemoveWorldResult {
        server_name: name.to_owned(),
        level_name: level.to_owned(),
        state: "removed",
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::session::{FakeSessions, SessionSpec};

    struct Sandbox {
        _temp: TempDir,
        layout: Layout,
    }

    #[fixture]
    fn sandbox() -> Sandbox {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::under(temp.path());
        layout.prepare().expect("layout");
        let instance = layout.instance_dir("s1");
        fs::create_dir_all(instance.join("worlds/L1/db")).expect("world L1");
        fs::create_dir_all(instance.join("worlds/L2")).expect("world L2");
        fs::write(instance.join("server.properties"), "level-name=L1\n").expect("live");
        Sandbox {
            _temp: temp,
            layout,
        }
    }

    fn run(layout: &Layout, sessions: &FakeSessions) {
        let root = layout.instance_dir("s1");
        sessions
            .start(&SessionSpec {
                name: String::from("s1"),
                program: root.join("bedrock_server"),
                args: Vec::new(),
                working_dir: root.clone(),
                env: Vec::new(),
                logfile: layout.log_file("s1"),
            })
            .expect("start");
    }

    #[rstest]
    fn lists_worlds_and_current_level(sandbox: Sandbox) {
        assert_eq!(worlds(&sandbox.layout, "s1").expect("worlds"), ["L1", "L2"]);
        assert_eq!(current_world(&sandbox.layout, "s1").expect("current"), "L1");
        assert_eq!(
            worlds(&sandbox.layout, "ghost").expect_err("missing").code(),
            3021
        );
    }

    #[rstest]
    fn only_the_current_world_of_a_live_instance_is_in_use(sandbox: Sandbox) {
        let sessions = FakeSessions::new();
        assert!(!world_in_use(&sandbox.layout, &sessions, "s1", None).expect("stopped"));

        run(&sandbox.layout, &sessions);
        assert!(world_in_use(&sandbox.layout, &sessions, "s1", None).expect("current"));
        assert!(world_in_use(&sandbox.layout, &sessions, "s1", Some("L1")).expect("L1"));
        assert!(!world_in_use(&sandbox.layout, &sessions, "s1", Some("L2")).expect("L2"));
    }

    #[rstest]
    fn remove_world_refuses_the_active_world(sandbox: Sandbox) {
        let sessions = FakeSessions::new();
        run(&sandbox.layout, &sessions);

        let error = remove_world(&sandbox.layout, &sessions, "s1", "L1").expect_err("in use");
        assert_eq!(error.code(), 3034);

        remove_world(&sandbox.layout, &sessions, "s1", "L2").expect("inactive world");
        assert_eq!(worlds(&sandbox.layout, "s1").expect("worlds"), ["L1"]);
        assert_eq!(
            remove_world(&sandbox.layout, &sessions, "s1", "L2")
                .expect_err("gone")
                .code(),
            3033
        );
    }

    #[rstest]
    #[case::parent("..", 3031)]
    #[case::grandparent("../..", 3031)]
    #[case::hidden(".trash", 3031)]
    fn remove_world_stays_inside_the_worlds_directory(
        sandbox: Sandbox,
        #[case] level: &str,
        #[case] code: u16,
    ) {
        let sessions = FakeSessions::new();
        let error = remove_world(&sandbox.layout, &sessions, "s1", level).expect_err("refused");
        assert_eq!(error.code(), code);
        assert!(sandbox.layout.instance_dir("s1").join("worlds/L1").is_dir());
    }

    #[rstest]
    fn server_names_outside_the_servers_directory_are_refused(sandbox: Sandbox) {
        let sessions = FakeSessions::new();
        let error = remove_world(&sandbox.layout, &sessions, "..", "server").expect_err("refused");
        assert_eq!(error.code(), 3022);
        assert!(sandbox.layout.servers_dir().is_dir());
    }
}
