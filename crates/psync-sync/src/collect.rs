//! Expiry of old backup snapshots

use crate::lock::{LAST_FILE, LOCK_DIR};
use filetime::FileTime;
use psync_types::{CancelCheck, CancellationToken, Error, MetadataOperation, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Remove snapshots in `state_dir` last modified at or before `expire_before`
///
/// The persisted list and the lock folder are never touched. Returns the
/// number of snapshots removed.
pub fn collect(state_dir: &Path, expire_before: i64, token: &CancellationToken) -> Result<usize> {
    let entries = fs::read_dir(state_dir)
        .map_err(|e| Error::metadata(MetadataOperation::Open, state_dir, e))?;

    let mut removed = 0;
    for entry in entries {
        token.check()?;
        let entry = entry.map_err(|e| Error::metadata(MetadataOperation::Read, state_dir, e))?;
        let name = entry.file_name();
        if name == LAST_FILE || name == LOCK_DIR {
            continue;
        }
        let path = entry.path();
        let metadata = fs::symlink_metadata(&path)
            .map_err(|e| Error::metadata(MetadataOperation::Read, &path, e))?;
        if FileTime::from_last_modification_time(&metadata).unix_seconds() > expire_before {
            continue;
        }

        if metadata.is_dir() {
            remove_tree(&path, token)?;
        } else {
            fs::remove_file(&path)
                .map_err(|e| Error::metadata(MetadataOperation::Remove, &path, e))?;
        }
        debug!("Removed expired backup '{}'", path.display());
        removed += 1;
    }
    if removed > 0 {
        info!("Removed {} expired backups from '{}'", removed, state_dir.display());
    }
    Ok(removed)
}

fn remove_tree(path: &Path, token: &CancellationToken) -> Result<()> {
    for entry in WalkDir::new(path).contents_first(true).follow_links(false) {
        token.check()?;
        let entry = entry.map_err(|e| Error::metadata(MetadataOperation::Open, path, e))?;
        let result = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        result.map_err(|e| Error::metadata(MetadataOperation::Remove, entry.path(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn age(path: &Path, secs: i64) {
        let time = FileTime::from_unix_time(secs, 0);
        filetime::set_file_times(path, time, time).unwrap();
    }

    #[test]
    fn test_collect_expired_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let state = temp_dir.path();
        for name in ["lock", "old", "fresh"] {
            fs::create_dir_all(state.join(name).join("sub")).unwrap();
            fs::write(state.join(name).join("sub/1,a.txt"), "a").unwrap();
        }
        fs::write(state.join("last"), "").unwrap();
        for name in ["lock", "old", "last"] {
            age(&state.join(name), 100);
        }
        age(&state.join("fresh"), 300);

        let removed = collect(state, 200, &CancellationToken::new()).unwrap();
        assert_eq!(removed, 1);
        assert!(!state.join("old").exists());
        assert!(state.join("fresh/sub/1,a.txt").exists());
        assert!(state.join("lock").exists());
        assert!(state.join("last").exists());
    }

    #[test]
    fn test_collect_boundary_is_inclusive() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("snap")).unwrap();
        age(&temp_dir.path().join("snap"), 200);
        assert_eq!(collect(temp_dir.path(), 200, &CancellationToken::new()).unwrap(), 1);
    }

    #[test]
    fn test_missing_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        let error = collect(&temp_dir.path().join("none"), 0, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(error.code(), -18);
    }
}
