//! Detached terminal sessions hosting server processes.
//!
//! A session is named after the instance it hosts and is the only handle the
//! toolkit keeps on a running server: liveness is decided by session-name
//! listing rather than PIDs, so state survives restarts of the calling
//! process. Two instances can never share a session name because instance
//! names are directory names.
//!
//! [`ScreenSessions`] drives GNU `screen`; the in-memory double behind the
//! `test-support` feature simulates a server for lifecycle tests.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

use strum::Display;
use thiserror::Error;

use crate::error::Coded;

#[cfg(any(test, feature = "test-support"))]
mod fake;
mod screen;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeBehaviour, FakeSessions};
pub use screen::ScreenSessions;

/// Everything needed to spawn one hosted process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// Session name; identical to the instance name.
    pub name: String,
    /// Program started inside the session.
    pub program: PathBuf,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Working directory of the program.
    pub working_dir: PathBuf,
    /// Extra environment for the program.
    pub env: Vec<(String, OsString)>,
    /// File receiving the combined output of the session.
    pub logfile: PathBuf,
}

/// Result of asking a session to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StopOutcome {
    /// The session existed and was asked to quit.
    Stopped,
    /// There was no such session.
    AlreadyStopped,
}

/// Session manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionAction {
    /// Spawning a session.
    Start,
    /// Terminating a session.
    Stop,
    /// Injecting input into a session.
    SendKeys,
    /// Enumerating sessions.
    List,
    /// Purging dead session bookkeeping.
    Wipe,
}

/// Errors reported by the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session manager could not be invoked at all.
    #[error("cannot invoke session manager for {action}: {source}")]
    Invoke {
        /// Operation being attempted.
        action: SessionAction,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The session manager ran but refused the request.
    #[error("session manager rejected {action} for '{name}' (status {status:?}): {detail}")]
    Rejected {
        /// Operation being attempted.
        action: SessionAction,
        /// Session name.
        name: String,
        /// Exit status of the session manager.
        status: Option<i32>,
        /// Diagnostic output captured from the session manager.
        detail: String,
    },
}

impl SessionError {
    const fn action(&self) -> SessionAction {
        match self {
            Self::Invoke { action, .. } | Self::Rejected { action, .. } => *action,
        }
    }
}

impl Coded for SessionError {
    fn code(&self) -> u16 {
        match self.action() {
            SessionAction::Start => 4061,
            SessionAction::Stop => 4062,
            SessionAction::SendKeys => 4063,
            SessionAction::List => 4064,
            SessionAction::Wipe => 4065,
        }
    }
}

/// Spawns, signals and enumerates named detached sessions.
///
/// All operations are synchronous and return once the session manager has
/// answered; none of them wait for the hosted process itself.
#[cfg_attr(test, mockall::automock)]
pub trait SessionRunner: Send + Sync {
    /// Spawns a new detached session.
    ///
    /// Callers must check [`SessionRunner::is_running`] first; a taken name
    /// is not detected here.
    fn start(&self, spec: &SessionSpec) -> Result<(), SessionError>;

    /// Asks a session to terminate. A missing session is a success.
    fn stop(&self, name: &str) -> Result<StopOutcome, SessionError>;

    /// Types one line of text into the session.
    fn send_keys(&self, name: &str, text: &str) -> Result<(), SessionError>;

    /// Names of live sessions.
    fn list(&self) -> Result<BTreeSet<String>, SessionError>;

    /// Purges bookkeeping of dead sessions.
    fn wipe(&self) -> Result<(), SessionError>;

    /// Whether a session with this name is live.
    fn is_running(&self, name: &str) -> Result<bool, SessionError> {
        Ok(self.list()?.contains(name))
    }
}
