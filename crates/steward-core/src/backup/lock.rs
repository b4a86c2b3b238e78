//! Advisory lock serialising content-store mutation.
//!
//! Threads of one process queue on a mutex; processes meet at a file in the
//! backups directory holding the owner's PID.
//! Creating it with `create_new` is the acquisition; dropping the guard
//! removes it. A lock left behind by a dead process is reclaimed at once; one
//! without a readable owner only after the wait ran out, since its owner may
//! still be writing its PID.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use super::BACKUP_TARGET;
use crate::error::Coded;

/// Name of the lock file below the backups directory.
pub const LOCK_FILE: &str = ".store.lock";

/// Errors raised while taking the content-store lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock file could not be created, read or cleared.
    #[error("cannot lock content store at '{path}': {source}")]
    Io {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Another live process kept the lock for the whole wait.
    #[error("content store is locked by process {pid}")]
    Busy {
        /// PID of the owner.
        pid: u32,
    },
}

impl Coded for LockError {
    fn code(&self) -> u16 {
        match self {
            Self::Io { .. } => 4071,
            Self::Busy { .. } => 4072,
        }
    }
}

static IN_PROCESS: Mutex<()> = Mutex::new(());

/// Held content-store lock; released on drop.
#[derive(Debug)]
pub(crate) struct StoreLock {
    path: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

impl StoreLock {
    /// Takes the lock in `dir`, polling every `tick` for at most `ticks`
    /// rounds while a live process holds it.
    pub(crate) fn acquire(dir: &Path, tick: Duration, ticks: u64) -> Result<Self, LockError> {
        let guard = IN_PROCESS.lock().unwrap_or_else(PoisonError::into_inner);
        let path = dir.join(LOCK_FILE);
        let io_error = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        let mut waited = 0;
        loop {
            match create_lock(&path) {
                Ok(()) => {
                    debug!(target: BACKUP_TARGET, file = %path.display(), "content store locked");
                    return Ok(Self {
                        path,
                        _guard: guard,
                    });
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
                Err(error) => return Err(io_error(error)),
            }
            let owner = read_owner(&path);
            let alive = owner.is_some_and(is_alive);
            if !alive && (owner.is_some() || waited >= ticks) {
                warn!(
                    target: BACKUP_TARGET,
                    pid = owner.unwrap_or_default(),
                    "reclaiming stale content store lock"
                );
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                    Err(error) => return Err(io_error(error)),
                }
                continue;
            }
            if waited >= ticks {
                return Err(LockError::Busy {
                    pid: owner.unwrap_or_default(),
                });
            }
            waited += 1;
            debug!(target: BACKUP_TARGET, pid = owner.unwrap_or_default(), waited, "content store busy");
            thread::sleep(tick);
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: BACKUP_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove content store lock"
                );
            }
            _ => {}
        }
    }
}

fn create_lock(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn read_owner(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw == 0 {
        return false;
    }
    !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(1);

    #[test]
    fn lock_is_released_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock = StoreLock::acquire(temp.path(), TICK, 0).expect("first");
        assert!(temp.path().join(LOCK_FILE).is_file());
        drop(lock);
        assert!(!temp.path().join(LOCK_FILE).exists());
        StoreLock::acquire(temp.path(), TICK, 0).expect("again");
    }

    #[test]
    fn live_owner_keeps_the_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(LOCK_FILE),
            format!("{}\n", std::process::id()),
        )
        .expect("foreign lock");
        let error = StoreLock::acquire(temp.path(), TICK, 2).expect_err("busy");
        assert_eq!(error.code(), 4072);
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(LOCK_FILE), "not-a-pid\n").expect("stale");
        let lock = StoreLock::acquire(temp.path(), TICK, 0).expect("reclaimed");
        let owner = fs::read_to_string(temp.path().join(LOCK_FILE)).expect("owner");
        assert_eq!(owner.trim(), std::process::id().to_string());
        drop(lock);
    }
}
