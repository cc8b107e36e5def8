//! Applies an incoming file to disk: temp file, fsync, rename-over-target for
//! atomic profiles, with umask handling and mtime restoration.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::archive::MergeRecord;
use crate::catalog::{ClusterItemProfile, WriteMode};
use crate::errors::{ClusterError, ClusterResult};
use crate::lockdir::PathLock;

/// Serializes the umask-set/write/umask-restore sequence across every
/// `apply()` call in the process: `libc::umask` mutates process-global state,
/// so two concurrent writers (e.g. the agent-info and extra-valid workers for
/// different clients) could otherwise observe each other's umask mid-write.
static UMASK_LOCK: Mutex<()> = Mutex::new(());

pub struct AtomicUpdater {
    pub root_dir: PathBuf,
    pub lock_dir: PathBuf,
}

impl AtomicUpdater {
    pub fn new(root_dir: PathBuf, lock_dir: PathBuf) -> Self {
        Self { root_dir, lock_dir }
    }

    fn resolve(&self, rel_path: &str) -> PathBuf {
        self.root_dir.join(rel_path.trim_start_matches('/'))
    }

    /// Writes `content` to `rel_path` under the given profile's write mode and umask.
    /// Acquires the per-path lock for the duration of the write.
    pub fn apply(
        &self,
        rel_path: &str,
        content: &[u8],
        mtime: Option<i64>,
        profile: &ClusterItemProfile,
    ) -> ClusterResult<()> {
        let _lock = PathLock::acquire(&self.lock_dir, rel_path)?;
        let target = self.resolve(rel_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let write_result = {
            let _umask_guard = UMASK_LOCK.lock();
            // SAFETY: umask is process-global; restore it immediately after use,
            // still holding the lock so no other call can observe it in between.
            let previous_umask = unsafe { libc::umask(profile.umask) };
            let write_result = match profile.write_mode {
                WriteMode::Atomic => self.write_atomic(&target, content),
                WriteMode::NonAtomic => self.write_in_place(&target, content),
            };
            unsafe {
                libc::umask(previous_umask);
            }
            write_result
        };
        write_result?;

        if let Some(mtime) = mtime {
            set_mtime(&target, mtime)?;
        }
        Ok(())
    }

    fn write_atomic(&self, target: &Path, content: &[u8]) -> ClusterResult<()> {
        let tmp_path = target.with_extension(format!(
            "tmp.{}",
            std::process::id()
        ));
        let write_outcome = (|| -> ClusterResult<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content)?;
            file.sync_all()?;
            fs::rename(&tmp_path, target)?;
            Ok(())
        })();
        if write_outcome.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        write_outcome
    }

    fn write_in_place(&self, target: &Path, content: &[u8]) -> ClusterResult<()> {
        let mut file = File::create(target)?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    /// Applies one agent-groups merge record, dropping it and reporting a
    /// warning if it references an agent ID outside `known_ids`.
    pub fn apply_agent_groups_record(
        &self,
        record: &MergeRecord,
        known_ids: &HashSet<String>,
        warnings: &AtomicU64,
        profile: &ClusterItemProfile,
    ) -> ClusterResult<bool> {
        if !known_ids.contains(&record.filename) {
            warnings.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        let rel_path = format!("{}{}", profile.key, record.filename);
        self.apply(&rel_path, &record.body, Some(record.mtime), profile)?;
        Ok(true)
    }
}

fn set_mtime(path: &Path, mtime: i64) -> ClusterResult<()> {
    let atime = filetime_now();
    let mtime = filetime_from_secs(mtime);
    filetime_set(path, atime, mtime)
}

// Small local stand-ins for file-time manipulation, kept dependency-free since
// the only thing needed is setting mtime via utimensat through libc.
fn filetime_now() -> libc::timespec {
    libc::timespec {
        tv_sec: 0,
        tv_nsec: libc::UTIME_OMIT as i64,
    }
}

fn filetime_from_secs(secs: i64) -> libc::timespec {
    libc::timespec {
        tv_sec: secs,
        tv_nsec: 0,
    }
}

fn filetime_set(path: &Path, atime: libc::timespec, mtime: libc::timespec) -> ClusterResult<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| ClusterError::Internal(e.to_string()))?;
    let times = [atime, mtime];
    // SAFETY: c_path is NUL-terminated and valid for the duration of this call.
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(ClusterError::Internal(format!(
            "utimensat failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    // Ensure the file is at least readable/writable by owner after umask changes.
    let _ = fs::metadata(path).map(|m| {
        let mut perms = m.permissions();
        perms.set_mode(perms.mode() | 0o600);
        let _ = fs::set_permissions(path, perms);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::profile::QUEUE_AGENT_INFO;
    use bytes::Bytes;

    #[test]
    fn applies_a_file_atomically_and_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let updater = AtomicUpdater::new(dir.path().to_path_buf(), dir.path().join("lockdir"));
        updater
            .apply("/queue/agent-info/001", b"hello", Some(1_700_000_000), &QUEUE_AGENT_INFO)
            .unwrap();
        let content = fs::read(dir.path().join("queue/agent-info/001")).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn unknown_agent_record_is_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let updater = AtomicUpdater::new(dir.path().to_path_buf(), dir.path().join("lockdir"));
        let warnings = AtomicU64::new(0);
        let known: HashSet<String> = HashSet::from(["001".to_string()]);
        let record = MergeRecord {
            filename: "999".into(),
            mtime: 0,
            body: Bytes::from_static(b"x"),
        };
        let applied = updater
            .apply_agent_groups_record(&record, &known, &warnings, &QUEUE_AGENT_INFO)
            .unwrap();
        assert!(!applied);
        assert_eq!(warnings.load(Ordering::Relaxed), 1);
    }
}
