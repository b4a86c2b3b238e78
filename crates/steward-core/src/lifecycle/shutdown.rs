//! Stopping instances and typing into their sessions.

use tracing::{debug, info, warn};

use super::error::{LifecycleError, Operation};
use super::types::{InstanceState, SendResult, StopResult, StopState};
use super::{LIFECYCLE_TARGET, ServerManager};

const STOP_COMMAND: &str = "stop";
const WAIT_NOTICE: &str = "This server is supposed to be shut down. Please finish your game.";
const WAIT_CHECK_TICKS: u64 = 5;
const WAIT_NOTICE_EVERY: u64 = 60;
const COUNTDOWN_TICKS: u64 = 60;

/// Chat line announced at a countdown tick, if any.
fn countdown_notice(tick: u64) -> Option<String> {
    let remaining = COUNTDOWN_TICKS.checked_sub(tick)?;
    match remaining {
        60 => Some(String::from(
            "This server will shutdown in 1 minute. Please finish your game.",
        )),
        30 | 20 | 10 => Some(format!(
            "This server will shutdown in {remaining} seconds. Please finish your game."
        )),
        _ => None,
    }
}

impl ServerManager {
    /// Stops a live instance.
    ///
    /// With `wait_for_disconnect` the call blocks until every player has left,
    /// reminding them periodically; there is no timeout. Otherwise connected
    /// players get a one-minute countdown. The server is then asked to stop
    /// and its session is killed if it outlives the stop timeout.
    ///
    /// # Errors
    ///
    /// Fails when the name is missing or the session cannot be queried,
    /// messaged or killed.
    pub fn stop(&self, name: &str, wait_for_disconnect: bool) -> Result<StopResult, LifecycleError> {
        if name.trim().is_empty() {
            return Err(LifecycleError::name_required(Operation::Stop));
        }
        if !self.running(Operation::Stop, name)? {
            debug!(target: LIFECYCLE_TARGET, server = name, "nothing to stop");
            return Ok(StopResult {
                server_name: name.to_owned(),
                state: StopState::NothingToStop,
                times: None,
            });
        }

        let waited = if wait_for_disconnect {
            self.wait_for_players(name)?
        } else {
            self.count_down(name)?
        };

        self.type_line(Operation::Stop, name, STOP_COMMAND)?;
        let ceiling = self.config.stop_timeout_secs;
        let (state, ticks) = match self.wait_until_gone(Operation::Stop, name, ceiling)? {
            Some(ticks) => (StopState::Stopped, ticks),
            None => {
                warn!(target: LIFECYCLE_TARGET, server = name, ceiling, "server ignored stop, killing session");
                self.sessions
                    .stop(name)
                    .map_err(|source| LifecycleError::Kill {
                        name: name.to_owned(),
                        source,
                    })?;
                (StopState::Killed, ceiling)
            }
        };

        let files = self.files(name);
        if files.root().is_dir() {
            self.record_state(Operation::Stop, name, &files, InstanceState::Stopped)?;
        }
        info!(target: LIFECYCLE_TARGET, server = name, %state, "server stopped");
        Ok(StopResult {
            server_name: name.to_owned(),
            state,
            times: Some(waited + ticks),
        })
    }

    fn wait_for_players(&self, name: &str) -> Result<u64, LifecycleError> {
        let mut waited = 0;
        let mut next_notice = 0;
        loop {
            let users = self.user_count(name)?;
            if users == 0 {
                return Ok(waited);
            }
            if waited >= next_notice {
                self.type_line(Operation::Stop, name, &format!("say {WAIT_NOTICE}"))?;
                next_notice += WAIT_NOTICE_EVERY;
            }
            debug!(target: LIFECYCLE_TARGET, server = name, users, waited, "waiting for players to leave");
            for _ in 0..WAIT_CHECK_TICKS {
                self.tick();
            }
            waited += WAIT_CHECK_TICKS;
        }
    }

    fn count_down(&self, name: &str) -> Result<u64, LifecycleError> {
        for tick in 0..COUNTDOWN_TICKS {
            if self.user_count(name)? == 0 {
                return Ok(tick);
            }
            if let Some(notice) = countdown_notice(tick) {
                self.type_line(Operation::Stop, name, &format!("say {notice}"))?;
            }
            self.tick();
        }
        Ok(COUNTDOWN_TICKS)
    }

    /// Broadcasts a chat message to a live instance.
    ///
    /// # Errors
    ///
    /// Fails when an input is empty, the instance is not running, or the
    /// message cannot be typed.
    pub fn say(&self, name: &str, message: &str) -> Result<SendResult, LifecycleError> {
        self.send_line(Operation::Say, name, "message", message, |text| {
            format!("say {text}")
        })
    }

    /// Types a raw admin command into a live instance.
    ///
    /// # Errors
    ///
    /// Fails when an input is empty, the instance is not running, or the
    /// command cannot be typed.
    pub fn send_command(&self, name: &str, command: &str) -> Result<SendResult, LifecycleError> {
        self.send_line(Operation::SendCommand, name, "command", command, str::to_owned)
    }

    fn send_line(
        &self,
        operation: Operation,
        name: &str,
        field: &'static str,
        input: &str,
        render: impl FnOnce(&str) -> String,
    ) -> Result<SendResult, LifecycleError> {
        if name.trim().is_empty() {
            return Err(LifecycleError::name_required(operation));
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LifecycleError::Required { operation, field });
        }
        if !self.running(operation, name)? {
            return Err(LifecycleError::NotRunning {
                operation,
                name: name.to_owned(),
            });
        }
        let command = render(trimmed);
        self.type_line(operation, name, &command)?;
        Ok(SendResult {
            server_name: name.to_owned(),
            command,
        })
    }

    fn type_line(&self, operation: Operation, name: &str, text: &str) -> Result<(), LifecycleError> {
        debug!(target: LIFECYCLE_TARGET, server = name, text, "typing into session");
        self.sessions
            .send_keys(name, text)
            .map_err(|source| LifecycleError::Send {
                operation,
                name: name.to_owned(),
                text: text.to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::countdown_notice;

    #[rstest]
    #[case(0, Some("This server will shutdown in 1 minute. Please finish your game."))]
    #[case(30, Some("This server will shutdown in 30 seconds. Please finish your game."))]
    #[case(40, Some("This server will shutdown in 20 seconds. Please finish your game."))]
    #[case(50, Some("This server will shutdown in 10 seconds. Please finish your game."))]
    #[case(15, None)]
    #[case(61, None)]
    fn countdown_announces_fixed_thresholds(#[case] tick: u64, #[case] expected: Option<&str>) {
        assert_eq!(countdown_notice(tick).as_deref(), expected);
    }
}
