//! Liveness and session state derived from a server log.
//!
//! The log of an instance is append-only and reused across restarts. Each
//! query replays it from the top: the last `Starting Server` banner starts a
//! fresh [`LogState`] and every recognised line after it is applied to that
//! state. Lines without the `[<timestamp> INFO]` prefix are ignored.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use strum::Display;
use thiserror::Error;
use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::{debug, warn};

use crate::error::Coded;
use crate::players::PlayerRegistry;

const LOGSTATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::logstate");

const LOG_TIMESTAMP: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second]:[subsecond digits:3]"
);

const STARTING: &str = "Starting Server";
const STARTED: &str = "Server started";
const STOP_REQUESTED: &str = "Server stop requested";
const LEVEL_NAME: &str = "Level Name:";
const GAME_MODE: &str = "Game mode:";
const DIFFICULTY: &str = "Difficulty:";

/// Renders one log line the way the server writes it.
#[must_use]
pub fn format_line(at: PrimitiveDateTime, message: &str) -> String {
    let stamp = at.format(LOG_TIMESTAMP).unwrap_or_default();
    format!("[{stamp} INFO] {message}")
}

/// Last recognised phase of the hosted server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ServerPhase {
    /// The startup banner was seen.
    Starting,
    /// The server reported readiness.
    Started,
    /// At least one player is connected.
    Connected,
    /// The last player left.
    Disconnected,
    /// The server acknowledged a stop request.
    Stopped,
}

/// One play session of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionSpan {
    /// When the player joined.
    #[serde(serialize_with = "serialize_stamp")]
    pub connected: PrimitiveDateTime,
    /// When the player left, if they did.
    #[serde(serialize_with = "serialize_optional_stamp")]
    pub disconnected: Option<PrimitiveDateTime>,
}

/// State of the latest run recorded in a log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogState {
    /// Time of the latest startup banner.
    #[serde(serialize_with = "serialize_optional_stamp")]
    pub start_time: Option<PrimitiveDateTime>,
    /// Time the server reported readiness.
    #[serde(serialize_with = "serialize_optional_stamp")]
    pub started_time: Option<PrimitiveDateTime>,
    /// Time the server acknowledged a stop request.
    #[serde(serialize_with = "serialize_optional_stamp")]
    pub stop_time: Option<PrimitiveDateTime>,
    /// Players currently connected.
    pub user_count: u32,
    /// Most recent session span per player.
    pub user_sessions: BTreeMap<String, SessionSpan>,
    /// Last recognised phase.
    pub state: Option<ServerPhase>,
    /// Message of the last recognised line.
    pub last_message: Option<String>,
    /// World announced in the startup banner.
    pub level_name: Option<String>,
    /// Game mode announced in the startup banner.
    pub gamemode: Option<String>,
    /// Difficulty announced in the startup banner.
    pub difficulty: Option<String>,
}

impl LogState {
    fn starting(at: PrimitiveDateTime) -> Self {
        Self {
            start_time: Some(at),
            state: Some(ServerPhase::Starting),
            last_message: Some(String::from(STARTING)),
            ..Self::default()
        }
    }

    /// Whether the latest run reported readiness after its banner.
    #[must_use]
    pub fn has_started(&self) -> bool {
        match (self.start_time, self.started_time) {
            (Some(start), Some(started)) => started > start,
            _ => false,
        }
    }

    /// Applies one recognised line to the state.
    ///
    /// Player events are forwarded to `registry`; registry failures are logged
    /// and never alter the derived state.
    pub fn apply(&mut self, at: PrimitiveDateTime, message: &str, registry: &dyn PlayerRegistry) {
        if message.contains(STARTING) {
            *self = Self::starting(at);
            return;
        }
        if message.contains(STARTED) {
            self.started_time = Some(at);
            self.mark(ServerPhase::Started, message);
        } else if let Some(level) = banner_value(message, LEVEL_NAME) {
            self.level_name = Some(level);
        } else if let Some(gamemode) = banner_value(message, GAME_MODE) {
            self.gamemode = Some(gamemode);
        } else if let Some(difficulty) = banner_value(message, DIFFICULTY) {
            self.difficulty = Some(difficulty);
        } else if let Some((name, xuid)) = player_event(connect_pattern(), message) {
            self.connect(at, name, xuid, message, registry);
        } else if let Some((name, _)) = player_event(disconnect_pattern(), message) {
            self.disconnect(at, name, message, registry);
        } else if message.contains(STOP_REQUESTED) {
            self.stop_time = Some(at);
            self.mark(ServerPhase::Stopped, message);
        }
    }

    fn mark(&mut self, phase: ServerPhase, message: &str) {
        self.state = Some(phase);
        self.last_message = Some(message.to_owned());
    }

    fn connect(
        &mut self,
        at: PrimitiveDateTime,
        name: &str,
        xuid: Option<&str>,
        message: &str,
        registry: &dyn PlayerRegistry,
    ) {
        let previous = self.user_sessions.insert(
            name.to_owned(),
            SessionSpan {
                connected: at,
                disconnected: None,
            },
        );
        // A repeated connect without disconnect replaces the open span.
        if previous.is_none_or(|span| span.disconnected.is_some()) {
            self.user_count = self.user_count.saturating_add(1);
        }
        self.mark(ServerPhase::Connected, message);
        if let Err(error) = registry.session_started(name, xuid, at) {
            warn!(target: LOGSTATE_TARGET, player = name, %error, "player registry rejected connect");
        }
    }

    fn disconnect(
        &mut self,
        at: PrimitiveDateTime,
        name: &str,
        message: &str,
        registry: &dyn PlayerRegistry,
    ) {
        let Some(span) = self
            .user_sessions
            .get_mut(name)
            .filter(|span| span.disconnected.is_none())
        else {
            debug!(target: LOGSTATE_TARGET, player = name, "disconnect without open session");
            return;
        };
        span.disconnected = Some(at);
        self.user_count = self.user_count.saturating_sub(1);
        let phase = if self.user_count == 0 {
            ServerPhase::Disconnected
        } else {
            ServerPhase::Connected
        };
        self.mark(phase, message);
        if let Err(error) = registry.session_ended(name, at) {
            warn!(target: LOGSTATE_TARGET, player = name, %error, "player registry rejected disconnect");
        }
    }
}

/// Errors raised while deriving log state.
#[derive(Debug, Error)]
pub enum LogError {
    /// The instance name was empty.
    #[error("\"server-name\" is required")]
    NameRequired,
    /// No log exists for the instance.
    #[error("log file not found: '{path}'")]
    NotFound {
        /// Expected log file.
        path: PathBuf,
    },
    /// The log exists but could not be read.
    #[error("cannot read log file '{path}': {source}")]
    Read {
        /// Log file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl Coded for LogError {
    fn code(&self) -> u16 {
        match self {
            Self::NameRequired => 1201,
            Self::NotFound { .. } => 1202,
            Self::Read { .. } => 1203,
        }
    }
}

/// Replays the log at `path`.
///
/// # Errors
///
/// Returns [`LogError::NotFound`] when the file does not exist and
/// [`LogError::Read`] when it cannot be read.
pub fn parse_file(path: &Path, registry: &dyn PlayerRegistry) -> Result<LogState, LogError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            LogError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            LogError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_reader(BufReader::new(file), registry).map_err(|source| LogError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Replays log lines from any buffered reader.
///
/// Invalid UTF-8 is replaced rather than rejected; servers occasionally echo
/// raw player input.
///
/// # Errors
///
/// Propagates read failures of the underlying reader.
pub fn parse_reader<R: BufRead>(
    mut reader: R,
    registry: &dyn PlayerRegistry,
) -> io::Result<LogState> {
    let mut state = LogState::default();
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buffer);
        if let Some((at, message)) = split_line(&line) {
            state.apply(at, message, registry);
        }
    }
    Ok(state)
}

fn line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}:\d{3}) INFO\]\s?(.*)$").ok()
        })
        .as_ref()
}

fn connect_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Player connected: ([^,]+)").ok())
        .as_ref()
}

fn disconnect_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Player disconnected: ([^,]+)").ok())
        .as_ref()
}

/// Newer builds append further fields such as `pfid` after the xuid.
fn xuid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"xuid: (\d+)").ok())
        .as_ref()
}

fn split_line(line: &str) -> Option<(PrimitiveDateTime, &str)> {
    let captures = line_pattern()?.captures(line.trim_end())?;
    let stamp = captures.get(1)?.as_str();
    let at = PrimitiveDateTime::parse(stamp, LOG_TIMESTAMP).ok()?;
    Some((at, captures.get(2)?.as_str().trim()))
}

fn player_event<'m>(
    pattern: Option<&Regex>,
    message: &'m str,
) -> Option<(&'m str, Option<&'m str>)> {
    let captures = pattern?.captures(message)?;
    let name = captures.get(1)?.as_str().trim();
    let xuid = xuid_pattern()
        .and_then(|xuid| xuid.captures(message))
        .and_then(|found| found.get(1))
        .map(|found| found.as_str());
    Some((name, xuid))
}

fn banner_value(message: &str, label: &str) -> Option<String> {
    let (_, value) = message.split_once(label)?;
    Some(value.trim().to_owned())
}

fn serialize_stamp<S: Serializer>(at: &PrimitiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let stamp = at.format(LOG_TIMESTAMP).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&stamp)
}

fn serialize_optional_stamp<S: Serializer>(
    at: &Option<PrimitiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match at {
        Some(at) => serialize_stamp(at, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests;
