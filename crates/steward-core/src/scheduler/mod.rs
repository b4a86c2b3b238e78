//! Job scheduler hosted in its own session.
//!
//! Recurring work such as nightly backups runs through an external cron-like
//! daemon. The daemon lives in a detached session named
//! [`SCHEDULER_SESSION`] next to the server instances, reads its jobs from a
//! YAML job file, and is queried through a separate control client.
//! [`JobScheduler`] starts and stops the daemon, edits the job file and
//! forwards job commands to the client.

mod control;
mod error;


use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use steward_config::{Config, Layout, create_shared_dir};
use strum::Display;
use tracing::{info, warn};

use crate::session::{SessionRunner, SessionSpec, StopOutcome};

pub use control::{ControlOutput, JobControl, ProcessControl};
pub use error::{SchedulerError, SchedulerOperation};

const SCHEDULER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::scheduler");

/// Session name of the scheduler daemon.
pub const SCHEDULER_SESSION: &str = "jobber";

const SOCKET_FILE: &str = "cmd.sock";

/// State reported by start and stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerState {
    /// The daemon session was spawned and showed up.
    Started,
    /// The daemon was already live.
    AlreadyRunning,
    /// The daemon session was terminated.
    Stopped,
    /// There was no daemon session.
    AlreadyStopped,
}

/// Outcome of starting or stopping the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerResult {
    /// Resulting state.
    pub state: SchedulerState,
    /// Ticks waited for the session to show up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<u64>,
}

/// The job file, verbatim or parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobFile {
    /// Raw YAML text.
    Text(String),
    /// The document converted to JSON values.
    Parsed(serde_json::Value),
}

/// Outcome of replacing the job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetConfigResult {
    /// File that was written.
    pub path: PathBuf,
    /// Always `success`.
    pub state: &'static str,
}

/// Jobs known to the running daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobList {
    /// One map per job, keyed by the lowercased column headers.
    pub jobs: Vec<BTreeMap<String, String>>,
}

/// Outcome of a pause, resume or run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobActionResult {
    /// Job the request targeted.
    pub job: String,
    /// Output of the control client.
    pub result: String,
}

/// Drives the scheduler daemon and its job file.
#[derive(Clone)]
pub struct JobScheduler {
    config: Config,
    layout: Layout,
    sessions: Arc<dyn SessionRunner>,
    control: Arc<dyn JobControl>,
}

impl JobScheduler {
    /// Builds a scheduler from explicit collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionRunner>,
        control: Arc<dyn JobControl>,
    ) -> Self {
        let layout = config.layout();
        Self {
            config,
            layout,
            sessions,
            control,
        }
    }

    /// Path of the job file.
    #[must_use]
    pub fn job_file(&self) -> &Path {
        &self.config.scheduler_file
    }

    /// Starts the daemon in its own session and waits for the session to
    /// show up.
    ///
    /// A session that never appears, or cannot be queried, is stopped again.
    ///
    /// # Errors
    ///
    /// Fails when the socket directory cannot be created, the session cannot
    /// be spawned, or the session does not appear within the start timeout.
    pub fn start(&self) -> Result<SchedulerResult, SchedulerError> {
        const OPERATION: SchedulerOperation = SchedulerOperation::Start;
        if self.running(OPERATION)? {
            info!(target: SCHEDULER_TARGET, "scheduler already running");
            return Ok(SchedulerResult {
                state: SchedulerState::AlreadyRunning,
                times: None,
            });
        }
        let socket_dir = &self.config.scheduler_socket_dir;
        for dir in [socket_dir.as_path(), self.layout.logs_dir()] {
            create_shared_dir(dir).map_err(|source| SchedulerError::Prepare {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let spec = SessionSpec {
            name: SCHEDULER_SESSION.to_owned(),
            program: PathBuf::from(&self.config.scheduler_runner),
            args: vec![
                "-u".into(),
                socket_dir.join(SOCKET_FILE).into_os_string(),
                self.config.scheduler_file.clone().into_os_string(),
            ],
            working_dir: socket_dir.clone(),
            env: Vec::new(),
            logfile: self.layout.log_file(SCHEDULER_SESSION),
        };
        self.sessions
            .start(&spec)
            .map_err(|source| SchedulerError::Sessions {
                operation: OPERATION,
                source,
            })?;

        let outcome = self.wait_until_listed();
        if let Err(error) = &outcome {
            warn!(target: SCHEDULER_TARGET, %error, "scheduler failed to start, stopping session");
            if let Err(stop_error) = self.sessions.stop(SCHEDULER_SESSION) {
                warn!(target: SCHEDULER_TARGET, error = %stop_error, "cannot stop failed scheduler session");
            }
        }
        outcome
    }

    fn wait_until_listed(&self) -> Result<SchedulerResult, SchedulerError> {
        let ceiling = self.config.start_timeout_secs;
        for ticks in 0..=ceiling {
            if self.running(SchedulerOperation::Start)? {
                info!(target: SCHEDULER_TARGET, ticks, "scheduler started");
                return Ok(SchedulerResult {
                    state: SchedulerState::Started,
                    times: Some(ticks),
                });
            }
            if ticks < ceiling {
                thread::sleep(self.config.poll_interval());
            }
        }
        Err(SchedulerError::StartTimeout { ticks: ceiling })
    }

    /// Terminates the daemon session.
    ///
    /// # Errors
    ///
    /// Fails when the session manager cannot stop the session.
    pub fn stop(&self) -> Result<SchedulerResult, SchedulerError> {
        let outcome =
            self.sessions
                .stop(SCHEDULER_SESSION)
                .map_err(|source| SchedulerError::Sessions {
                    operation: SchedulerOperation::Stop,
                    source,
                })?;
        let state = match outcome {
            StopOutcome::Stopped => SchedulerState::Stopped,
            StopOutcome::AlreadyStopped => SchedulerState::AlreadyStopped,
        };
        info!(target: SCHEDULER_TARGET, %state, "scheduler stop requested");
        Ok(SchedulerResult { state, times: None })
    }

    /// Stops the daemon, then starts it again so it rereads the job file.
    ///
    /// # Errors
    ///
    /// Fails with the stop error, or with the start error once stopped.
    pub fn restart(&self) -> Result<SchedulerResult, SchedulerError> {
        self.stop()?;
        self.start()
    }

    /// Reads the job file, verbatim or converted to JSON values.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, or when `parsed` is set and the
    /// file is not valid YAML.
    pub fn get_config(&self, parsed: bool) -> Result<JobFile, SchedulerError> {
        const OPERATION: SchedulerOperation = SchedulerOperation::GetConfig;
        let path = self.job_file();
        let text = fs::read_to_string(path).map_err(|source| SchedulerError::ReadConfig {
            operation: OPERATION,
            path: path.to_path_buf(),
            source,
        })?;
        if !parsed {
            return Ok(JobFile::Text(text));
        }
        serde_yaml::from_str(&text)
            .map(JobFile::Parsed)
            .map_err(|source| SchedulerError::InvalidConfig {
                operation: OPERATION,
                source,
            })
    }

    /// Replaces the job file with the YAML (or JSON) `document`.
    ///
    /// The document is parsed and written back out in canonical YAML, so a
    /// malformed document never reaches the daemon. The running daemon only
    /// picks the change up after [`JobScheduler::restart`].
    ///
    /// # Errors
    ///
    /// Fails when the document does not parse or the file cannot be written.
    pub fn set_config(&self, document: &str) -> Result<SetConfigResult, SchedulerError> {
        let invalid = |source| SchedulerError::InvalidConfig {
            operation: SchedulerOperation::SetConfig,
            source,
        };
        let value: serde_yaml::Value = serde_yaml::from_str(document).map_err(invalid)?;
        let canonical = serde_yaml::to_string(&value).map_err(invalid)?;
        let path = self.job_file();
        let write_error = |source| SchedulerError::WriteConfig {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, canonical).map_err(write_error)?;
        info!(target: SCHEDULER_TARGET, path = %path.display(), "job file replaced");
        Ok(SetConfigResult {
            path: path.to_path_buf(),
            state: "success",
        })
    }

    /// Replaces the job file with the document stored at `source`.
    ///
    /// # Errors
    ///
    /// Fails when `source` cannot be read, or as [`JobScheduler::set_config`].
    pub fn set_config_from(&self, source: &Path) -> Result<SetConfigResult, SchedulerError> {
        let document =
            fs::read_to_string(source).map_err(|error| SchedulerError::ReadConfig {
                operation: SchedulerOperation::SetConfig,
                path: source.to_path_buf(),
                source: error,
            })?;
        self.set_config(&document)
    }

    /// Lists the jobs known to the running daemon.
    ///
    /// # Errors
    ///
    /// Fails when the control client cannot run or refuses, which it does
    /// while the daemon is down.
    pub fn list_jobs(&self) -> Result<JobList, SchedulerError> {
        let output = self.control(SchedulerOperation::ListJobs, &["list"])?;
        Ok(JobList {
            jobs: control::parse_job_table(&output.stdout),
        })
    }

    /// Pauses the named job.
    ///
    /// # Errors
    ///
    /// Fails when the job name is empty or the control client refuses.
    pub fn pause(&self, job: &str) -> Result<JobActionResult, SchedulerError> {
        self.job_action(SchedulerOperation::Pause, "pause", job)
    }

    /// Resumes the named job.
    ///
    /// # Errors
    ///
    /// Fails when the job name is empty or the control client refuses.
    pub fn resume(&self, job: &str) -> Result<JobActionResult, SchedulerError> {
        self.job_action(SchedulerOperation::Resume, "resume", job)
    }

    /// Runs the named job once, immediately.
    ///
    /// # Errors
    ///
    /// Fails when the job name is empty or the control client refuses.
    pub fn run(&self, job: &str) -> Result<JobActionResult, SchedulerError> {
        self.job_action(SchedulerOperation::Run, "test", job)
    }

    fn job_action(
        &self,
        operation: SchedulerOperation,
        subcommand: &str,
        job: &str,
    ) -> Result<JobActionResult, SchedulerError> {
        let job_name = job.trim();
        if job_name.is_empty() {
            return Err(SchedulerError::JobRequired { operation });
        }
        let output = self.control(operation, &[subcommand, job_name])?;
        info!(target: SCHEDULER_TARGET, %operation, job = job_name, "job command sent");
        Ok(JobActionResult {
            job: job_name.to_owned(),
            result: output.stdout.trim().to_owned(),
        })
    }

    fn control(
        &self,
        operation: SchedulerOperation,
        args: &[&str],
    ) -> Result<ControlOutput, SchedulerError> {
        let output = self
            .control
            .run(args)
            .map_err(|source| SchedulerError::Control { operation, source })?;
        if !output.succeeded() {
            return Err(SchedulerError::Rejected {
                operation,
                status: output.status,
                detail: output.detail().to_owned(),
            });
        }
        Ok(output)
    }

    fn running(&self, operation: SchedulerOperation) -> Result<bool, SchedulerError> {
        self.sessions
            .is_running(SCHEDULER_SESSION)
            .map_err(|source| SchedulerError::Sessions { operation, source })
    }
}
