//! Error surface of instance lifecycle operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::Coded;
use crate::fsutil::{self, RemoveTreeError};
use crate::logstate::LogError;
use crate::properties::PropertiesError;
use crate::scheduler::SCHEDULER_SESSION;
use crate::session::SessionError;
use crate::versions::{Version, VersionError};
use crate::worlds::WorldError;

/// Operation that raised a generic lifecycle failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    /// Instance creation.
    Create,
    /// Instance removal.
    Remove,
    /// Start with overrides.
    Start,
    /// Start from persisted configuration.
    StartSimple,
    /// Graceful or forced stop.
    Stop,
    /// Chat broadcast.
    Say,
    /// Raw admin command.
    SendCommand,
    /// Reinstall at another version.
    Update,
    /// Read-only aggregation.
    Details,
    /// Instance enumeration.
    List,
}

impl Operation {
    /// First code of the operation's block.
    const fn base(self) -> u16 {
        match self {
            Self::Create => 1130,
            Self::Remove => 1140,
            Self::Start => 1150,
            Self::Stop => 1160,
            Self::Say => 1170,
            Self::SendCommand => 1180,
            Self::StartSimple => 1240,
            Self::Update => 1250,
            Self::Details => 1270,
            Self::List => 1310,
        }
    }
}

/// Errors raised by instance lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A required input was empty.
    #[error("\"{field}\" is required")]
    Required {
        /// Operation being attempted.
        operation: Operation,
        /// Missing field.
        field: &'static str,
    },
    /// The instance name would resolve outside the servers directory or
    /// collide with the scheduler session.
    #[error("server name '{name}' is reserved or would leave the servers directory")]
    InvalidName {
        /// Operation being attempted.
        operation: Operation,
        /// Rejected name.
        name: String,
    },
    /// The instance does not exist.
    #[error("server '{name}' does not exist")]
    NotCreated {
        /// Operation being attempted.
        operation: Operation,
        /// Instance name.
        name: String,
    },
    /// The instance is live but must not be.
    #[error("server '{name}' is running")]
    Running {
        /// Operation being attempted.
        operation: Operation,
        /// Instance name.
        name: String,
    },
    /// The instance is not live but must be.
    #[error("server '{name}' is not running")]
    NotRunning {
        /// Operation being attempted.
        operation: Operation,
        /// Instance name.
        name: String,
    },
    /// Liveness could not be determined.
    #[error("cannot query sessions")]
    Sessions {
        /// Operation being attempted.
        operation: Operation,
        /// The session manager failure.
        #[source]
        source: SessionError,
    },
    /// Nothing is cached to create an instance from.
    #[error("no version of branch {branch} has been downloaded")]
    NothingDownloaded {
        /// Requested branch.
        branch: crate::versions::Branch,
    },
    /// The requested version is not cached.
    #[error("version {version} has not been downloaded")]
    VersionNotDownloaded {
        /// Requested version.
        version: Version,
    },
    /// The version or branch could not be resolved.
    #[error("cannot resolve version")]
    ResolveVersion {
        /// Operation being attempted.
        operation: Operation,
        /// The parse failure.
        #[source]
        source: VersionError,
    },
    /// The instance directory exists already.
    #[error("server '{name}' already exists")]
    AlreadyExists {
        /// Instance name.
        name: String,
    },
    /// The distribution archive could not be unpacked.
    #[error("cannot unpack '{archive}' into '{target}': {source}")]
    Unpack {
        /// Cached archive.
        archive: PathBuf,
        /// Instance directory.
        target: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// A property file could not be read, written or merged.
    #[error("cannot {action} for server '{name}'")]
    Properties {
        /// Operation being attempted.
        operation: Operation,
        /// Step within the operation.
        action: PropertiesAction,
        /// Instance name.
        name: String,
        /// The property failure.
        #[source]
        source: PropertiesError,
    },
    /// The shipped configuration could not be moved aside.
    #[error("cannot rename shipped properties of '{name}': {source}")]
    RenameShipped {
        /// Instance name.
        name: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Deleting the instance failed.
    #[error("cannot remove server '{name}'")]
    RemoveTree {
        /// Instance name.
        name: String,
        /// The removal failure.
        #[source]
        source: RemoveTreeError,
    },
    /// Another live instance listens on the requested port.
    #[error("port {port} is already used by server '{holder}'")]
    PortInUse {
        /// Requested port.
        port: String,
        /// Live instance holding the port.
        holder: String,
    },
    /// The log file could not be reset.
    #[error("cannot reset log '{path}': {source}")]
    ResetLog {
        /// Log file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The session could not be spawned.
    #[error("cannot spawn session for server '{name}'")]
    Spawn {
        /// Instance name.
        name: String,
        /// The session manager failure.
        #[source]
        source: SessionError,
    },
    /// The server did not report readiness in time; its session was stopped.
    #[error("server '{name}' did not start within {ticks} ticks")]
    StartTimeout {
        /// Instance name.
        name: String,
        /// Ticks waited.
        ticks: u64,
    },
    /// The log could not be replayed.
    #[error("cannot read log state of server '{name}'")]
    Log {
        /// Operation being attempted.
        operation: Operation,
        /// Instance name.
        name: String,
        /// The log failure.
        #[source]
        source: LogError,
    },
    /// Typing into the session failed.
    #[error("cannot send '{text}' to server '{name}'")]
    Send {
        /// Operation being attempted.
        operation: Operation,
        /// Instance name.
        name: String,
        /// Line being typed.
        text: String,
        /// The session manager failure.
        #[source]
        source: SessionError,
    },
    /// The session could not be terminated.
    #[error("cannot kill session of server '{name}'")]
    Kill {
        /// Instance name.
        name: String,
        /// The session manager failure.
        #[source]
        source: SessionError,
    },
    /// The instances directory could not be listed.
    #[error("cannot list servers in '{path}': {source}")]
    ListInstances {
        /// Servers directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Worlds could not be inspected.
    #[error("cannot inspect worlds of server '{name}'")]
    Worlds {
        /// Operation being attempted.
        operation: Operation,
        /// Instance name.
        name: String,
        /// The world failure.
        #[source]
        source: WorldError,
    },
    /// The online version could not be resolved.
    #[error("cannot resolve online version")]
    OnlineVersion {
        /// The catalogue failure.
        #[source]
        source: VersionError,
    },
    /// Refusing to install an older version without force.
    #[error("refusing to downgrade server '{name}' from {current} to {target}")]
    Downgrade {
        /// Instance name.
        name: String,
        /// Installed version.
        current: Version,
        /// Requested version.
        target: Version,
    },
    /// The instance could not be moved aside before an update.
    #[error("cannot stage server '{name}' in '{staging}': {source}")]
    Stage {
        /// Instance name.
        name: String,
        /// Staging directory.
        staging: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A step of an update failed after the instance was moved aside.
    #[error(
        "update of server '{name}' failed at step '{step}', previous installation kept at '{staging}'"
    )]
    UpdateStep {
        /// Instance name.
        name: String,
        /// Failed step.
        step: UpdateStep,
        /// Where the previous installation now lives.
        staging: PathBuf,
        /// The step failure.
        #[source]
        source: Box<UpdateFailure>,
    },
}

/// Property-file step within an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PropertiesAction {
    /// Reading lifecycle metadata.
    #[strum(serialize = "read state properties")]
    ReadState,
    /// Writing lifecycle metadata.
    #[strum(serialize = "write state properties")]
    WriteState,
    /// Writing the static configuration.
    #[strum(serialize = "write default properties")]
    WriteDefaults,
    /// Reading the static configuration.
    #[strum(serialize = "read default properties")]
    ReadDefaults,
    /// Writing per-start overrides.
    #[strum(serialize = "write start properties")]
    WriteStart,
    /// Merging the effective configuration.
    #[strum(serialize = "materialize server properties")]
    Materialize,
    /// Reading the effective configuration.
    #[strum(serialize = "read server properties")]
    ReadLive,
}

/// Step of the update procedure that runs after staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UpdateStep {
    /// Fetching the target archive.
    Download,
    /// Installing the target version.
    Create,
    /// Moving worlds and player files back.
    MoveData,
    /// Carrying live tunables over.
    MergeLive,
    /// Restoring the lifecycle state.
    RestoreState,
    /// Deleting the staging directory.
    Cleanup,
}

/// Failure inside an update step.
#[derive(Debug, Error)]
pub enum UpdateFailure {
    /// A download failed.
    #[error(transparent)]
    Version(#[from] VersionError),
    /// A lifecycle operation failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// A property file operation failed.
    #[error(transparent)]
    Properties(#[from] PropertiesError),
    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing the staging directory failed.
    #[error(transparent)]
    Remove(#[from] RemoveTreeError),
}

impl Coded for UpdateFailure {
    fn code(&self) -> u16 {
        match self {
            Self::Version(error) => error.code(),
            Self::Lifecycle(error) => error.code(),
            Self::Properties(error) => error.code(),
            Self::Io { .. } => 4045,
            Self::Remove(error) => error.code(),
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::Version(error) => error.cause(),
            Self::Lifecycle(error) => error.cause(),
            Self::Properties(error) => error.cause(),
            Self::Io { .. } | Self::Remove(_) => None,
        }
    }
}

impl LifecycleError {
    /// Shorthand for [`LifecycleError::Required`] on `server-name`.
    pub(crate) fn checked_name(operation: Operation, name: &str) -> Result<(), Self> {
        if fsutil::is_plain_name(name) && name != SCHEDULER_SESSION {
            Ok(())
        } else {
            Err(Self::InvalidName {
                operation,
                name: name.to_owned(),
            })
        }
    }

    pub(crate) const fn name_required(operation: Operation) -> Self {
        Self::Required {
            operation,
            field: "server-name",
        }
    }
}

impl Coded for LifecycleError {
    fn code(&self) -> u16 {
        match self {
            Self::Required {
                operation: Operation::Create,
                ..
            } => 1132,
            Self::Required { operation, field } => {
                operation.base() + if *field == "server-name" { 1 } else { 2 }
            }
            Self::InvalidName { operation, .. } => operation.base(),
            Self::NotCreated { operation, .. } => operation.base() + 2,
            Self::Running { operation, .. } | Self::NotRunning { operation, .. } => {
                operation.base() + 3
            }
            Self::Send { operation, .. } => operation.base() + 4,
            Self::Worlds { operation, .. } => operation.base() + 5,
            Self::Log { operation, .. } => operation.base() + 6,
            Self::Sessions { operation, .. } => operation.base() + 7,
            Self::ResolveVersion {
                operation: Operation::Create,
                ..
            } => 1139,
            Self::ResolveVersion { operation, .. } => operation.base() + 8,
            Self::Properties {
                operation: Operation::Create,
                ..
            } => 1137,
            Self::Properties { operation, .. } => operation.base() + 9,
            Self::NothingDownloaded { .. } => 1133,
            Self::VersionNotDownloaded { .. } => 1134,
            Self::AlreadyExists { .. } => 1135,
            Self::Unpack { .. } => 1136,
            Self::RenameShipped { .. } => 1138,
            Self::RemoveTree { .. } => 1144,
            Self::PortInUse { .. } => 1155,
            Self::Kill { .. } => 1163,
            Self::ResetLog { .. } => 1243,
            Self::Spawn { .. } => 1244,
            Self::StartTimeout { .. } => 1245,
            Self::Stage { .. } => 1254,
            Self::Downgrade { .. } => 1255,
            Self::OnlineVersion { .. } => 1256,
            Self::UpdateStep { step, .. } => match step {
                UpdateStep::Download => 1260,
                UpdateStep::Create => 1261,
                UpdateStep::MoveData => 1262,
                UpdateStep::MergeLive => 1263,
                UpdateStep::RestoreState => 1264,
                UpdateStep::Cleanup => 1265,
            },
            Self::ListInstances { .. } => 1311,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::Sessions { source, .. }
            | Self::Spawn { source, .. }
            | Self::Send { source, .. }
            | Self::Kill { source, .. } => Some(source),
            Self::ResolveVersion { source, .. } | Self::OnlineVersion { source } => Some(source),
            Self::Properties { source, .. } => Some(source),
            Self::RemoveTree { source, .. } => Some(source),
            Self::Log { source, .. } => Some(source),
            Self::Worlds { source, .. } => Some(source),
            Self::UpdateStep { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
