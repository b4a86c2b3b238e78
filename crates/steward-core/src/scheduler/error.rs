//! Error surface of scheduler operations.

use std::io;
use std::path::PathBuf;

use steward_config::LayoutError;
use thiserror::Error;

use crate::error::Coded;
use crate::session::SessionError;

/// Scheduler operation that raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SchedulerOperation {
    /// Starting the daemon session.
    Start,
    /// Stopping the daemon session.
    Stop,
    /// Reading the job file.
    GetConfig,
    /// Replacing the job file.
    SetConfig,
    /// Listing scheduled jobs.
    ListJobs,
    /// Pausing a job.
    Pause,
    /// Resuming a paused job.
    Resume,
    /// Running a job once, now.
    Run,
}

impl SchedulerOperation {
    const fn base(self) -> u16 {
        match self {
            Self::Start => 4100,
            Self::Stop => 4110,
            Self::GetConfig => 4120,
            Self::SetConfig => 4130,
            Self::ListJobs => 4150,
            Self::Pause => 4160,
            Self::Resume => 4170,
            Self::Run => 4180,
        }
    }
}

/// Errors raised by the job scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The session manager failed while driving the daemon session.
    #[error("scheduler session failed during {operation}")]
    Sessions {
        /// Operation being attempted.
        operation: SchedulerOperation,
        /// The session manager failure.
        #[source]
        source: SessionError,
    },
    /// The daemon session never showed up in the session list.
    #[error("scheduler did not start correctly after {ticks} ticks")]
    StartTimeout {
        /// Ticks waited.
        ticks: u64,
    },
    /// A scheduler directory could not be created.
    #[error("cannot prepare '{}'", path.display())]
    Prepare {
        /// Directory being created.
        path: PathBuf,
        /// Underlying layout error.
        #[source]
        source: LayoutError,
    },
    /// The job file could not be read.
    #[error("cannot read job file '{}': {source}", path.display())]
    ReadConfig {
        /// Operation being attempted.
        operation: SchedulerOperation,
        /// File being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The job file or a replacement document is not valid YAML.
    #[error("invalid job document: {source}")]
    InvalidConfig {
        /// Operation being attempted.
        operation: SchedulerOperation,
        /// Parser failure.
        #[source]
        source: serde_yaml::Error,
    },
    /// The job file could not be written.
    #[error("cannot write job file '{}': {source}", path.display())]
    WriteConfig {
        /// File being written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The control client refused the request, usually because the daemon
    /// is not running.
    #[error("scheduler refused {operation} (status {status:?}): {detail}")]
    Rejected {
        /// Operation being attempted.
        operation: SchedulerOperation,
        /// Exit status of the control client.
        status: Option<i32>,
        /// Diagnostic output captured from the control client.
        detail: String,
    },
    /// The control client could not be invoked.
    #[error("cannot invoke scheduler control for {operation}: {source}")]
    Control {
        /// Operation being attempted.
        operation: SchedulerOperation,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A job name was required but empty.
    #[error("\"job\" is required for {operation}")]
    JobRequired {
        /// Operation being attempted.
        operation: SchedulerOperation,
    },
}

impl Coded for SchedulerError {
    fn code(&self) -> u16 {
        match self {
            Self::Sessions { operation, .. } | Self::Rejected { operation, .. } => {
                operation.base() + 1
            }
            Self::StartTimeout { .. } => 4102,
            Self::Prepare { .. } => 4103,
            Self::InvalidConfig { operation, .. } | Self::Control { operation, .. } => {
                operation.base() + 2
            }
            Self::ReadConfig {
                operation: SchedulerOperation::SetConfig,
                ..
            } => 4133,
            Self::ReadConfig { .. } => 4121,
            Self::WriteConfig { .. } => 4131,
            Self::JobRequired { operation } => operation.base() + 3,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::Sessions { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SchedulerOperation::ListJobs, 4151)]
    #[case(SchedulerOperation::Pause, 4161)]
    #[case(SchedulerOperation::Resume, 4171)]
    #[case(SchedulerOperation::Run, 4181)]
    fn refusals_follow_the_operation(#[case] operation: SchedulerOperation, #[case] code: u16) {
        let error = SchedulerError::Rejected {
            operation,
            status: Some(1),
            detail: String::new(),
        };
        assert_eq!(error.code(), code);
    }

    #[test]
    fn session_failures_keep_their_cause() {
        let error = SchedulerError::Sessions {
            operation: SchedulerOperation::Stop,
            source: SessionError::Invoke {
                action: crate::session::SessionAction::Stop,
                source: io::Error::other("gone"),
            },
        };
        assert_eq!(error.code(), 4111);
        assert_eq!(error.cause().map(|cause| cause.code()), Some(4062));
    }
}
