//! In-memory session manager that simulates a hosted server.
//!
//! Spawning a session writes the startup banner into the session log, typing
//! `stop` writes the shutdown line and ends the session. Timestamps come from
//! a private clock that advances one second per line, so every written line
//! is strictly later than the previous one.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use super::{SessionAction, SessionError, SessionRunner, SessionSpec, StopOutcome};
use crate::logstate::format_line;
use crate::properties;

const STOP_COMMAND: &str = "stop";

/// How a simulated server reacts to the session manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FakeBehaviour {
    /// Reports "Server started" right after the banner and obeys `stop`.
    #[default]
    Boots,
    /// Never reports "Server started".
    Hangs,
    /// Boots but ignores the `stop` command; only a forced quit ends it.
    IgnoresStop,
    /// Replaces its log with a directory right after the banner, so the log
    /// can no longer be read.
    ClobbersLog,
}

#[derive(Debug, Default)]
struct FakeState {
    default_behaviour: FakeBehaviour,
    behaviours: BTreeMap<String, FakeBehaviour>,
    sessions: BTreeMap<String, PathBuf>,
    sent: Vec<(String, String)>,
    spawned: Vec<SessionSpec>,
    wipes: usize,
    clock: Option<PrimitiveDateTime>,
}

impl FakeState {
    fn behaviour(&self, name: &str) -> FakeBehaviour {
        self.behaviours
            .get(name)
            .copied()
            .unwrap_or(self.default_behaviour)
    }

    fn tick(&mut self) -> PrimitiveDateTime {
        let next = match self.clock {
            Some(previous) => previous.saturating_add(Duration::SECOND),
            None => {
                let now = OffsetDateTime::now_utc();
                PrimitiveDateTime::new(now.date(), now.time())
            }
        };
        self.clock = Some(next);
        next
    }

    fn append(&mut self, logfile: &Path, message: &str) -> io::Result<()> {
        let at = self.tick();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)?;
        writeln!(file, "{}", format_line(at, message))
    }
}

/// Session manager double backed by process memory.
#[derive(Debug, Default)]
pub struct FakeSessions {
    state: Mutex<FakeState>,
}

impl FakeSessions {
    /// Sessions that boot and obey `stop`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions that all follow `behaviour` unless overridden per name.
    #[must_use]
    pub fn with_behaviour(behaviour: FakeBehaviour) -> Self {
        let fake = Self::default();
        fake.lock().default_behaviour = behaviour;
        fake
    }

    /// Overrides the behaviour of one session name.
    pub fn set_behaviour(&self, name: &str, behaviour: FakeBehaviour) {
        self.lock().behaviours.insert(name.to_owned(), behaviour);
    }

    /// Registers a live session without spawning anything, like an orphan
    /// left behind by a crashed caller.
    pub fn adopt(&self, name: &str, logfile: &Path) {
        self.lock()
            .sessions
            .insert(name.to_owned(), logfile.to_path_buf());
    }

    /// Simulates a player joining the server hosted by `name`.
    ///
    /// # Errors
    ///
    /// Fails when the session is not live or its log cannot be appended to.
    pub fn connect(&self, name: &str, player: &str, xuid: &str) -> Result<(), SessionError> {
        self.log_event(name, &format!("Player connected: {player}, xuid: {xuid}"))
    }

    /// Simulates a player leaving the server hosted by `name`.
    ///
    /// # Errors
    ///
    /// Fails when the session is not live or its log cannot be appended to.
    pub fn disconnect(&self, name: &str, player: &str) -> Result<(), SessionError> {
        self.log_event(name, &format!("Player disconnected: {player}"))
    }

    /// Lines typed into the named session, oldest first.
    #[must_use]
    pub fn sent_to(&self, name: &str) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter(|(session, _)| session == name)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Every spawn request received, oldest first.
    #[must_use]
    pub fn spawned(&self) -> Vec<SessionSpec> {
        self.lock().spawned.clone()
    }

    /// Number of wipe requests received.
    #[must_use]
    pub fn wipes(&self) -> usize {
        self.lock().wipes
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_event(&self, name: &str, message: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        let Some(logfile) = state.sessions.get(name).cloned() else {
            return Err(no_such_session(SessionAction::SendKeys, name));
        };
        state
            .append(&logfile, message)
            .map_err(|source| SessionError::Invoke {
                action: SessionAction::SendKeys,
                source,
            })
    }
}

fn no_such_session(action: SessionAction, name: &str) -> SessionError {
    SessionError::Rejected {
        action,
        name: name.to_owned(),
        status: Some(1),
        detail: String::from("no screen session found"),
    }
}

fn banner(working_dir: &Path) -> Vec<String> {
    let live = properties::read_or_default(&working_dir.join("server.properties"))
        .unwrap_or_default();
    let mut lines = vec![String::from("Starting Server")];
    if let Some(level) = live.get("level-name") {
        lines.push(format!("Level Name: {level}"));
    }
    if let Some(gamemode) = live.get("gamemode") {
        lines.push(format!("Game mode: {gamemode}"));
    }
    if let Some(difficulty) = live.get("difficulty") {
        lines.push(format!("Difficulty: {difficulty}"));
    }
    lines
}

impl SessionRunner for FakeSessions {
    fn start(&self, spec: &SessionSpec) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.sessions.contains_key(&spec.name) {
            return Err(SessionError::Rejected {
                action: SessionAction::Start,
                name: spec.name.clone(),
                status: Some(1),
                detail: String::from("session name already taken"),
            });
        }
        let invoke = |source| SessionError::Invoke {
            action: SessionAction::Start,
            source,
        };
        for line in banner(&spec.working_dir) {
            state.append(&spec.logfile, &line).map_err(invoke)?;
        }
        match state.behaviour(&spec.name) {
            FakeBehaviour::Hangs => {}
            FakeBehaviour::ClobbersLog => {
                fs::remove_file(&spec.logfile)
                    .and_then(|()| fs::create_dir(&spec.logfile))
                    .map_err(invoke)?;
            }
            FakeBehaviour::Boots | FakeBehaviour::IgnoresStop => state
                .append(&spec.logfile, "Server started.")
                .map_err(invoke)?,
        }
        state
            .sessions
            .insert(spec.name.clone(), spec.logfile.clone());
        state.spawned.push(spec.clone());
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<StopOutcome, SessionError> {
        let mut state = self.lock();
        Ok(match state.sessions.remove(name) {
            Some(_) => StopOutcome::Stopped,
            None => StopOutcome::AlreadyStopped,
        })
    }

    fn send_keys(&self, name: &str, text: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        let Some(logfile) = state.sessions.get(name).cloned() else {
            return Err(no_such_session(SessionAction::SendKeys, name));
        };
        state.sent.push((name.to_owned(), text.to_owned()));
        if text == STOP_COMMAND && state.behaviour(name) != FakeBehaviour::IgnoresStop {
            state
                .append(&logfile, "Server stop requested.")
                .map_err(|source| SessionError::Invoke {
                    action: SessionAction::SendKeys,
                    source,
                })?;
            state.sessions.remove(name);
        }
        Ok(())
    }

    fn list(&self) -> Result<std::collections::BTreeSet<String>, SessionError> {
        Ok(self.lock().sessions.keys().cloned().collect())
    }

    fn wipe(&self) -> Result<(), SessionError> {
        self.lock().wipes += 1;
        Ok(())
    }
}
