//! Per-path file locks guarding concurrent updates to the same on-disk file.

use std::fs::{self, File};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::errors::{ClusterError, ClusterResult};

/// An exclusive, blocking lock on one path, held for the duration of a single
/// file application. Released when dropped.
pub struct PathLock {
    _file: File,
}

impl PathLock {
    /// Acquires the lock for `path` under `lock_dir`, creating `lock_dir` if needed.
    pub fn acquire(lock_dir: &Path, path: &str) -> ClusterResult<Self> {
        fs::create_dir_all(lock_dir)?;
        let lock_path = lock_file_path(lock_dir, path);
        let file = File::create(&lock_path)?;
        // SAFETY: flock is called on a valid fd owned by `file` for its lifetime.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(ClusterError::Lock(format!(
                "flock({:?}) failed: {}",
                lock_path,
                std::io::Error::last_os_error()
            )));
        }
        Ok(PathLock { _file: file })
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        // SAFETY: fd is valid until `_file` is dropped, which happens after this.
        unsafe {
            libc::flock(self._file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn lock_file_path(lock_dir: &Path, path: &str) -> PathBuf {
    let sanitized: String = path
        .chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect();
    lock_dir.join(format!("{}.lock", sanitized.trim_start_matches('_')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquiring_and_dropping_does_not_leave_the_process_stuck() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = PathLock::acquire(dir.path(), "/queue/agent-info/001").unwrap();
        }
        // A second acquisition after the first is dropped must not block.
        let _lock2 = PathLock::acquire(dir.path(), "/queue/agent-info/001").unwrap();
    }
}
