//! GNU `screen` backed session manager.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use super::{SessionAction, SessionError, SessionRunner, SessionSpec, StopOutcome};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");
const SCREEN_BINARY: &str = "screen";

/// Session manager driving the `screen` binary.
#[derive(Debug, Clone)]
pub struct ScreenSessions {
    binary: OsString,
}

impl Default for ScreenSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSessions {
    /// Uses `screen` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary(SCREEN_BINARY)
    }

    /// Uses an explicit `screen` binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, action: SessionAction, command: &mut Command) -> Result<Output, SessionError> {
        debug!(target: SESSION_TARGET, %action, ?command, "invoking session manager");
        command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SessionError::Invoke { action, source })
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }
}

fn rejected(action: SessionAction, name: &str, output: &Output) -> SessionError {
    let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if detail.is_empty() {
        detail = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    }
    SessionError::Rejected {
        action,
        name: name.to_owned(),
        status: output.status.code(),
        detail,
    }
}

fn session_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^\t\d+\.(.+?)\s+\(").ok())
        .as_ref()
}

/// Extracts session names from `screen -list` output.
pub(super) fn parse_session_list(output: &str) -> BTreeSet<String> {
    let Some(pattern) = session_pattern() else {
        return BTreeSet::new();
    };
    pattern
        .captures_iter(output)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().to_owned())
        .collect()
}

impl SessionRunner for ScreenSessions {
    fn start(&self, spec: &SessionSpec) -> Result<(), SessionError> {
        let mut command = self.command();
        command
            .arg("-dmS")
            .arg(&spec.name)
            .arg("-L")
            .arg("-Logfile")
            .arg(&spec.logfile)
            .arg(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        let output = self.run(SessionAction::Start, &mut command)?;
        if !output.status.success() {
            return Err(rejected(SessionAction::Start, &spec.name, &output));
        }
        info!(
            target: SESSION_TARGET,
            session = %spec.name,
            logfile = %spec.logfile.display(),
            "session spawned"
        );
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<StopOutcome, SessionError> {
        if !self.is_running(name)? {
            return Ok(StopOutcome::AlreadyStopped);
        }
        let mut command = self.command();
        command.args(["-S", name, "-X", "quit"]);
        let output = self.run(SessionAction::Stop, &mut command)?;
        if output.status.success() {
            info!(target: SESSION_TARGET, session = name, "session quit");
            return Ok(StopOutcome::Stopped);
        }
        // The session may have ended between listing and quitting.
        if self.is_running(name)? {
            Err(rejected(SessionAction::Stop, name, &output))
        } else {
            Ok(StopOutcome::AlreadyStopped)
        }
    }

    fn send_keys(&self, name: &str, text: &str) -> Result<(), SessionError> {
        let mut command = self.command();
        command
            .args(["-S", name, "-p", "0", "-X", "stuff"])
            .arg(format!("{text}\n"));
        let output = self.run(SessionAction::SendKeys, &mut command)?;
        if !output.status.success() {
            return Err(rejected(SessionAction::SendKeys, name, &output));
        }
        debug!(target: SESSION_TARGET, session = name, text, "keys sent");
        Ok(())
    }

    fn list(&self) -> Result<BTreeSet<String>, SessionError> {
        let mut command = self.command();
        command.arg("-list");
        // `screen -list` exits non-zero when no sessions exist; the listing is
        // parsed regardless of status.
        let output = self.run(SessionAction::List, &mut command)?;
        Ok(parse_session_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn wipe(&self) -> Result<(), SessionError> {
        let mut command = self.command();
        command.arg("-wipe");
        // `screen -wipe` reports non-zero whenever nothing was wiped.
        self.run(SessionAction::Wipe, &mut command)?;
        info!(target: SESSION_TARGET, "dead sessions wiped");
        Ok(())
    }
}
