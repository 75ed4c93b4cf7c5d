//! Database lock protocol.
//!
//! Four logical modes guard the package database: `READ` (shared),
//! `ADVISORY` (planners; shared with readers, excludes itself),
//! `EXCLUSIVE` (executor; excludes everything), and the transitional
//! upgrade from `ADVISORY` to `EXCLUSIVE`. Locks live as one pidfile per
//! holder under `<db_dir>/.lock/`; stale files from dead processes are
//! detected by probing the recorded pid and broken after a grace window.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::{PkgError, Result};

/// Logical lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Concurrent readers; blocks any writer.
    Read,
    /// Taken by planners; shared with readers, excludes itself and
    /// stronger modes.
    Advisory,
    /// Taken by the executor; excludes all others.
    Exclusive,
}

impl LockMode {
    /// What: Decide whether a new lock may coexist with a held one.
    ///
    /// Inputs:
    /// - `held`: Mode already held by another process.
    ///
    /// Output:
    /// - `true` when the two modes are compatible.
    #[must_use]
    pub const fn compatible_with(self, held: Self) -> bool {
        match self {
            Self::Read => !matches!(held, Self::Exclusive),
            Self::Advisory => matches!(held, Self::Read),
            Self::Exclusive => false,
        }
    }
}

/// On-disk record of one lock holder.
#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    /// Holding process id.
    pid: i32,
    /// Held mode.
    mode: LockMode,
}

/// A held database lock. Dropping releases it.
#[derive(Debug)]
pub struct DbLock {
    dir: PathBuf,
    path: PathBuf,
    mode: LockMode,
    pid: i32,
}

/// What: Probe whether a process is alive.
///
/// Inputs:
/// - `pid`: Process id from a lock record.
///
/// Output:
/// - `true` when the pid exists (even if owned by another user).
#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    // Without a probe, never break a lock.
    true
}

/// Age of a lock file, saturating to zero on clock skew.
fn file_age(path: &Path) -> Duration {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .unwrap_or(Duration::ZERO)
}

impl DbLock {
    /// What: Acquire a database lock.
    ///
    /// Inputs:
    /// - `db_dir`: Database directory; the lock directory is created
    ///   beneath it.
    /// - `mode`: Requested mode.
    /// - `grace`: Window after which a dead holder's lock is broken.
    ///
    /// Output:
    /// - The held lock; releasing is automatic on drop.
    ///
    /// Details:
    /// - Live incompatible holders fail the acquisition immediately with
    ///   `LockBusy`; waiting and retrying is the caller's policy.
    /// - A lock whose pid no longer exists is broken once its file is
    ///   older than the grace window; the break is logged and reported to
    ///   the caller through the returned `broken` list of
    ///   [`DbLock::acquire_with_report`].
    ///
    /// # Errors
    ///
    /// Returns `PkgError::LockBusy` with the holder pid when blocked, or
    /// `PkgError::Io` for filesystem failures.
    pub fn acquire(db_dir: &Path, mode: LockMode, grace: Duration) -> Result<Self> {
        Self::acquire_with_report(db_dir, mode, grace).map(|(lock, _)| lock)
    }

    /// Same as [`DbLock::acquire`], also returning the pids whose stale
    /// locks were broken so the caller can emit warning events.
    pub fn acquire_with_report(
        db_dir: &Path,
        mode: LockMode,
        grace: Duration,
    ) -> Result<(Self, Vec<i32>)> {
        let dir = db_dir.join(".lock");
        fs::create_dir_all(&dir)?;
        let mut broken = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<LockRecord>(&raw) else {
                // Unreadable records are treated as stale immediately.
                tracing::warn!(path = %path.display(), "removing malformed lock file");
                let _ = fs::remove_file(&path);
                continue;
            };
            if pid_alive(record.pid) {
                if !mode.compatible_with(record.mode) {
                    return Err(PkgError::LockBusy {
                        holder: Some(record.pid),
                    });
                }
            } else if file_age(&path) >= grace {
                tracing::warn!(pid = record.pid, "breaking stale lock of dead process");
                fs::remove_file(&path)?;
                broken.push(record.pid);
            } else {
                // Dead but inside the grace window: stay conservative.
                return Err(PkgError::LockBusy {
                    holder: Some(record.pid),
                });
            }
        }

        #[allow(clippy::cast_possible_wrap)]
        let pid = std::process::id() as i32;
        let path = dir.join(format!("lock.{pid}"));
        let record = LockRecord { pid, mode };
        fs::write(&path, serde_json::to_string(&record)?)?;
        Ok((
            Self {
                dir,
                path,
                mode,
                pid,
            },
            broken,
        ))
    }

    /// Currently held mode.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// What: Upgrade an `ADVISORY` lock to `EXCLUSIVE`.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - Unit; on success the lock file records the new mode.
    ///
    /// Details:
    /// - Permitted only while no other holder (reader or otherwise)
    ///   remains, per the transitional `UPGRADE` mode of the protocol.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::LockBusy` when other live holders exist, or
    /// `PkgError::Config` when the held mode is not `ADVISORY`.
    pub fn upgrade(&mut self) -> Result<()> {
        if self.mode != LockMode::Advisory {
            return Err(PkgError::Config(format!(
                "cannot upgrade a {:?} lock",
                self.mode
            )));
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == self.path {
                continue;
            }
            if let Ok(raw) = fs::read_to_string(&path)
                && let Ok(record) = serde_json::from_str::<LockRecord>(&raw)
                && pid_alive(record.pid)
            {
                return Err(PkgError::LockBusy {
                    holder: Some(record.pid),
                });
            }
        }
        let record = LockRecord {
            pid: self.pid,
            mode: LockMode::Exclusive,
        };
        fs::write(&self.path, serde_json::to_string(&record)?)?;
        self.mode = LockMode::Exclusive;
        Ok(())
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to release lock");
        }
    }
}
