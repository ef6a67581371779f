//! Run-level mutual exclusion between overlapping invocations.
//!
//! Cron only guarantees cadence, not that the previous run finished. A lock
//! file under the backup root keeps a slow run and its successor from
//! interleaving archive creation and run log writes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "packrat.lock";

/// Held for the duration of one invocation; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Tries to take the lock under `root`.
    ///
    /// Returns `Ok(None)` when another invocation currently holds it.
    pub fn acquire(root: &Path) -> io::Result<Option<Self>> {
        let path = root.join(LOCK_FILE);
        match File::create_new(&path) {
            Ok(mut file) => {
                // Best effort, the pid is only for a human inspecting a hang.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!(target: "lock", "Removing lock file {} failed: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_while_held() {
        let root = tempfile::tempdir().unwrap();

        let lock = RunLock::acquire(root.path()).unwrap();
        assert!(lock.is_some());
        assert!(RunLock::acquire(root.path()).unwrap().is_none());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let root = tempfile::tempdir().unwrap();

        let lock = RunLock::acquire(root.path()).unwrap();
        drop(lock);
        assert!(RunLock::acquire(root.path()).unwrap().is_some());
    }
}
