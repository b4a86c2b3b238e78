//! Client side of the scheduler daemon.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::SCHEDULER_TARGET;

/// Captured result of one control client invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOutput {
    /// Exit status; `None` when the client was killed by a signal.
    pub status: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl ControlOutput {
    /// Whether the client exited with status zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == Some(0)
    }

    /// Diagnostic text: stderr when present, stdout otherwise.
    #[must_use]
    pub fn detail(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs subcommands of the scheduler control client.
pub trait JobControl: Send + Sync {
    /// Runs the client with `args` and captures its output.
    ///
    /// # Errors
    ///
    /// Fails only when the client cannot be executed; a non-zero exit is
    /// reported through [`ControlOutput::status`].
    fn run(&self, args: &[&str]) -> io::Result<ControlOutput>;
}

/// Control client invoked as a child process.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    binary: OsString,
}

impl ProcessControl {
    /// Uses the client at `binary`, resolved through `PATH` when relative.
    #[must_use]
    pub fn new(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl JobControl for ProcessControl {
    fn run(&self, args: &[&str]) -> io::Result<ControlOutput> {
        let mut command = Command::new(&self.binary);
        command.args(args).stdin(Stdio::null());
        debug!(target: SCHEDULER_TARGET, ?command, "invoking scheduler control");
        let output = command.output()?;
        Ok(ControlOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn column_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\S+(?: \S+)*").ok())
        .as_ref()
}

/// Splits the fixed-width job table printed by the control client.
///
/// Columns are separated by at least two spaces in the header line; each
/// header becomes a lowercase, dash-joined key. Rows are cut at the header
/// offsets, so values may contain single spaces.
pub(crate) fn parse_job_table(table: &str) -> Vec<BTreeMap<String, String>> {
    let mut lines = table.trim_end().lines().filter(|line| !line.trim().is_empty());
    let (Some(header), Some(pattern)) = (lines.next(), column_pattern()) else {
        return Vec::new();
    };
    let columns: Vec<(usize, String)> = pattern
        .find_iter(header)
        .filter_map(|found| {
            let offset = header
                .char_indices()
                .position(|(byte, _)| byte == found.start())?;
            let key = found
                .as_str()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("-")
                .to_lowercase();
            Some((offset, key))
        })
        .collect();
    let ends = columns
        .iter()
        .skip(1)
        .map(|(offset, _)| Some(*offset))
        .chain(std::iter::once(None));
    let bounds: Vec<(usize, Option<usize>, &str)> = columns
        .iter()
        .zip(ends)
        .map(|((start, key), end)| (*start, end, key.as_str()))
        .collect();
    lines
        .map(|line| {
            bounds
                .iter()
                .map(|&(start, end, key)| {
                    let cell = line.chars().skip(start);
                    let value: String = match end {
                        Some(stop) => cell.take(stop.saturating_sub(start)).collect(),
                        None => cell.collect(),
                    };
                    (key.to_owned(), value.trim().to_owned())
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
NAME          STATUS  SEC/MIN/HR/MDAY/MTH/WDAY  NEXT RUNTIME          NOTIFY ON ERR
BackupAll     Good    0 0 4 * * *               Jan 02 04:00:00 2025  false
RestartDaily  Paused  0 30 5 * * *              Jan 02 05:30:00 2025  true
";

    #[test]
    fn rows_are_cut_at_header_offsets() {
        let jobs = parse_job_table(LISTING);
        assert_eq!(jobs.len(), 2);
        let first = jobs.first().expect("first job");
        assert_eq!(first.get("name").map(String::as_str), Some("BackupAll"));
        assert_eq!(
            first.get("next-runtime").map(String::as_str),
            Some("Jan 02 04:00:00 2025")
        );
        assert_eq!(
            first.get("sec/min/hr/mday/mth/wday").map(String::as_str),
            Some("0 0 4 * * *")
        );
        let second = jobs.get(1).expect("second job");
        assert_eq!(second.get("status").map(String::as_str), Some("Paused"));
        assert_eq!(second.get("notify-on-err").map(String::as_str), Some("true"));
    }

    #[test]
    fn header_only_listing_has_no_jobs() {
        assert!(parse_job_table("NAME  STATUS\n").is_empty());
        assert!(parse_job_table("").is_empty());
    }

    #[test]
    fn detail_prefers_stderr() {
        let output = ControlOutput {
            status: Some(1),
            stdout: String::from("out"),
            stderr: String::from(" err \n"),
        };
        assert!(!output.succeeded());
        assert_eq!(output.detail(), "err");
    }
}
