//! Parallel fan-out of single-instance operations.
//!
//! Each sub-operation runs on a bounded rayon pool and is isolated: a failing
//! instance lands in the `failed` bucket and never aborts its siblings. The
//! call returns once every sub-operation has finished.

use std::collections::BTreeSet;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tracing::{info, warn};

use crate::backup::{BackupError, BackupRequest};
use crate::error::{Coded, ErrorReport};
use crate::lifecycle::{
    LifecycleError, ServerManager, StartState, StopState, UpdateState,
};

const FANOUT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::fanout");

/// Successful outcome category of one sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// The operation changed something.
    First,
    /// The desired state already held.
    Second,
}

/// A sub-operation that failed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Failure {
    /// Instance name.
    pub server_name: String,
    /// What went wrong.
    pub error: ErrorReport,
}

/// Per-instance outcomes of a fan-out, grouped by category.
///
/// Serializes as a map keyed by the two category labels and `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    labels: [&'static str; 2],
    /// Instances in the first category, sorted.
    pub first: Vec<String>,
    /// Instances in the second category, sorted.
    pub second: Vec<String>,
    /// Failed instances, sorted by name.
    pub failed: Vec<Failure>,
}

impl Buckets {
    fn new(labels: [&'static str; 2]) -> Self {
        Self {
            labels,
            first: Vec::new(),
            second: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Labels of the two success categories.
    #[must_use]
    pub const fn labels(&self) -> [&'static str; 2] {
        self.labels
    }
}

impl Serialize for Buckets {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let [first, second] = self.labels;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(first, &self.first)?;
        map.serialize_entry(second, &self.second)?;
        map.serialize_entry("failed", &self.failed)?;
        map.end()
    }
}

/// Errors that prevent a fan-out from running at all.
#[derive(Debug, Error)]
pub enum FanOutError {
    /// The worker pool could not be built.
    #[error("cannot build worker pool: {source}")]
    Pool {
        /// The rayon failure.
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
    /// The target instances could not be enumerated.
    #[error("cannot enumerate target servers")]
    Targets {
        /// The listing failure.
        #[source]
        source: LifecycleError,
    },
}

impl Coded for FanOutError {
    fn code(&self) -> u16 {
        match self {
            Self::Pool { .. } => 4051,
            Self::Targets { .. } => 4052,
        }
    }

    fn cause(&self) -> Option<&dyn Coded> {
        match self {
            Self::Pool { .. } => None,
            Self::Targets { source } => Some(source),
        }
    }
}

/// Runs `task` for every name on a pool of `workers` threads.
///
/// # Errors
///
/// Fails only when the pool cannot be built.
pub fn fan_out<F>(
    workers: usize,
    names: &[String],
    labels: [&'static str; 2],
    task: F,
) -> Result<Buckets, FanOutError>
where
    F: Fn(&str) -> Result<Bucket, ErrorReport> + Sync,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("steward-worker-{index}"))
        .build()
        .map_err(|source| FanOutError::Pool { source })?;
    let outcomes: Vec<(String, Result<Bucket, ErrorReport>)> = pool.install(|| {
        names
            .par_iter()
            .map(|name| (name.clone(), task(name)))
            .collect()
    });

    let mut buckets = Buckets::new(labels);
    for (name, outcome) in outcomes {
        match outcome {
            Ok(Bucket::First) => buckets.first.push(name),
            Ok(Bucket::Second) => buckets.second.push(name),
            Err(error) => {
                warn!(target: FANOUT_TARGET, server = %name, code = error.code, "sub-operation failed");
                buckets.failed.push(Failure {
                    server_name: name,
                    error,
                });
            }
        }
    }
    buckets.first.sort();
    buckets.second.sort();
    buckets
        .failed
        .sort_by(|left, right| left.server_name.cmp(&right.server_name));
    info!(
        target: FANOUT_TARGET,
        first = buckets.first.len(),
        second = buckets.second.len(),
        failed = buckets.failed.len(),
        "fan-out finished"
    );
    Ok(buckets)
}

impl ServerManager {
    fn created_names(&self) -> Result<Vec<String>, FanOutError> {
        Ok(self
            .list()
            .map_err(|source| FanOutError::Targets { source })?
            .created)
    }

    /// Starts every created instance in parallel.
    ///
    /// # Errors
    ///
    /// Fails only when the instances cannot be enumerated or the pool cannot
    /// be built; per-instance failures are reported in the buckets.
    pub fn start_all(&self) -> Result<Buckets, FanOutError> {
        let names = self.created_names()?;
        fan_out(
            self.config().worker_threads(),
            &names,
            ["started", "already running"],
            |name| match self.start_simple(name) {
                Ok(result) if result.state == StartState::Started => Ok(Bucket::First),
                Ok(_) => Ok(Bucket::Second),
                Err(error) => Err(ErrorReport::from(&error)),
            },
        )
    }

    /// Stops every created instance and every live session in parallel.
    ///
    /// Live sessions without an instance directory are included so orphans
    /// are cleaned up too.
    ///
    /// # Errors
    ///
    /// Fails only when the targets cannot be enumerated or the pool cannot be
    /// built; per-instance failures are reported in the buckets.
    pub fn stop_all(&self, wait_for_disconnect: bool) -> Result<Buckets, FanOutError> {
        let listed = self
            .list()
            .map_err(|source| FanOutError::Targets { source })?;
        let names: Vec<String> = listed
            .created
            .into_iter()
            .chain(listed.running)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        fan_out(
            self.config().worker_threads(),
            &names,
            ["stopped", "already stopped"],
            |name| match self.stop(name, wait_for_disconnect) {
                Ok(result) if result.state == StopState::NothingToStop => Ok(Bucket::Second),
                Ok(_) => Ok(Bucket::First),
                Err(error) => Err(ErrorReport::from(&error)),
            },
        )
    }

    /// Updates every created instance to the online version in parallel.
    ///
    /// # Errors
    ///
    /// Fails only when the instances cannot be enumerated or the pool cannot
    /// be built; per-instance failures are reported in the buckets.
    pub fn update_all(&self, force: bool) -> Result<Buckets, FanOutError> {
        let names = self.created_names()?;
        fan_out(
            self.config().worker_threads(),
            &names,
            ["updated", "up-to-date"],
            |name| match self.update(name, None, force) {
                Ok(result) if result.state == UpdateState::Updated => Ok(Bucket::First),
                Ok(_) => Ok(Bucket::Second),
                Err(error) => Err(ErrorReport::from(&error)),
            },
        )
    }

    /// Backs up every created instance in parallel with default parameters.
    ///
    /// Live instances are skipped and land in the second bucket.
    ///
    /// # Errors
    ///
    /// Fails only when the instances cannot be enumerated or the pool cannot
    /// be built; per-instance failures are reported in the buckets.
    pub fn backup_all(&self, compress: bool) -> Result<Buckets, FanOutError> {
        let names = self.created_names()?;
        let engine = self.backups();
        fan_out(
            self.config().worker_threads(),
            &names,
            ["backed-up", "still-running"],
            |name| {
                if self
                    .sessions()
                    .is_running(name)
                    .map_err(|error| ErrorReport::from(&error))?
                {
                    return Ok(Bucket::Second);
                }
                let request = BackupRequest {
                    compress,
                    ..BackupRequest::new(name)
                };
                match engine.create(&request) {
                    Ok(_) => Ok(Bucket::First),
                    Err(BackupError::WorldInUse { .. }) => Ok(Bucket::Second),
                    Err(error) => Err(ErrorReport::from(&error)),
                }
            },
        )
    }
}

#[cfg(test)]
mod tests;
