//! Walks the managed profiles under a root directory and hashes every file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use walkdir::WalkDir;

use crate::errors::{ClusterError, ClusterResult};

use super::profile::PROFILES;
use super::{Catalog, FileEntry};

/// Scans every configured profile directory under `root` and builds a catalog
/// keyed by path relative to `root`. `cancel` is checked between every file;
/// if it is observed set, the scan stops and returns an error so the caller
/// keeps the previous catalog rather than swapping in a partial one.
pub fn scan_catalog(root: &Path, cancel: &AtomicBool) -> ClusterResult<Catalog> {
    let mut catalog = Catalog::default();
    for profile in PROFILES {
        let profile_root = root.join(profile.key.trim_start_matches('/'));
        if !profile_root.exists() {
            continue;
        }
        for entry in WalkDir::new(&profile_root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if cancel.load(Ordering::Relaxed) {
                return Err(ClusterError::Internal("catalog scan cancelled".into()));
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let abs = entry.path();
            let rel = abs
                .strip_prefix(root)
                .unwrap_or(abs)
                .to_string_lossy()
                .replace('\\', "/");
            let rel_key = format!("/{rel}");
            let content = std::fs::read(abs)?;
            let digest = md5::compute(&content);
            let metadata = std::fs::metadata(abs)?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            catalog.files.insert(
                rel_key.clone(),
                FileEntry {
                    md5: format!("{digest:x}"),
                    mtime,
                    cluster_item_key: profile.key.to_string(),
                },
            );
        }
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scans_a_single_file_under_a_profile() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("etc/shared");
        fs::create_dir_all(&shared).unwrap();
        fs::write(shared.join("ossec.conf"), b"hello").unwrap();

        let catalog = scan_catalog(dir.path(), &AtomicBool::new(false)).unwrap();
        assert_eq!(catalog.len(), 1);
        let entry = catalog.get("/etc/shared/ossec.conf").unwrap();
        assert_eq!(entry.md5, format!("{:x}", md5::compute(b"hello")));
        assert_eq!(entry.cluster_item_key, "/etc/shared/");
    }

    #[test]
    fn missing_profile_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = scan_catalog(dir.path(), &AtomicBool::new(false)).unwrap();
        assert!(catalog.is_empty());
    }
}
