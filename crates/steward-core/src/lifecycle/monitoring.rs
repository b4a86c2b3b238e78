//! Polling helpers over the instance log and the session list.
//!
//! Every wait is a loop of fixed-length ticks with a ceiling; the log file and
//! the session list are the only signals observed.

use std::thread;

use tracing::debug;

use super::error::{LifecycleError, Operation};
use super::{LIFECYCLE_TARGET, ServerManager};
use crate::logstate::{self, LogError, LogState};

/// Outcome of waiting for a server to report readiness.
#[derive(Debug)]
pub(super) enum Readiness {
    /// The server started after the given number of ticks.
    Started {
        /// Ticks waited.
        ticks: u64,
        /// Log state at readiness.
        log: LogState,
    },
    /// The ceiling was reached first.
    TimedOut,
}

impl ServerManager {
    /// Sleeps for one poll tick.
    pub(super) fn tick(&self) {
        thread::sleep(self.config.poll_interval());
    }

    /// Replays the instance log, treating a missing log as "no state yet".
    pub(super) fn current_log(
        &self,
        operation: Operation,
        name: &str,
    ) -> Result<Option<LogState>, LifecycleError> {
        match logstate::parse_file(&self.layout.log_file(name), self.players()) {
            Ok(state) => Ok(Some(state)),
            Err(LogError::NotFound { .. }) => Ok(None),
            Err(source) => Err(LifecycleError::Log {
                operation,
                name: name.to_owned(),
                source,
            }),
        }
    }

    /// Polls the log until the latest run reports readiness.
    pub(super) fn wait_until_started(&self, name: &str) -> Result<Readiness, LifecycleError> {
        let ceiling = self.config.start_timeout_secs;
        for ticks in 0..=ceiling {
            if let Some(log) = self.current_log(Operation::StartSimple, name)?
                && log.has_started()
            {
                return Ok(Readiness::Started { ticks, log });
            }
            debug!(target: LIFECYCLE_TARGET, server = name, ticks, "waiting for server to start");
            if ticks < ceiling {
                self.tick();
            }
        }
        Ok(Readiness::TimedOut)
    }

    /// Polls the session list until the session is gone.
    ///
    /// Returns the ticks waited, or `None` when the ceiling was reached.
    pub(super) fn wait_until_gone(
        &self,
        operation: Operation,
        name: &str,
        ceiling: u64,
    ) -> Result<Option<u64>, LifecycleError> {
        for ticks in 0..=ceiling {
            if !self.running(operation, name)? {
                return Ok(Some(ticks));
            }
            debug!(target: LIFECYCLE_TARGET, server = name, ticks, "waiting for session to end");
            if ticks < ceiling {
                self.tick();
            }
        }
        Ok(None)
    }

    /// Players connected according to the latest run in the log.
    pub(super) fn user_count(&self, name: &str) -> Result<u32, LifecycleError> {
        Ok(self
            .current_log(Operation::Stop, name)?
            .map_or(0, |log| log.user_count))
    }
}
