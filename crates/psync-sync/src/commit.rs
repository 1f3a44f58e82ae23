//! Applying downloads to the tree
//!
//! Three passes over the merged list:
//!
//! 1. In reverse order, entries about to be replaced or deleted leave the
//!    tree. Regular files move into the lock folder as `<N>,<basename>`
//!    backups, symlinks are unlinked and directories removed.
//! 2. In forward order, downloads move into place and directories are
//!    created or get their permissions updated.
//! 3. In reverse order, directories get their mtime, after their contents
//!    stopped changing. This covers downloaded directories and every
//!    directory an entry was moved into or out of.
//!
//! The pending state file then replaces `.psync/last`, unless the run was
//! cancelled by then.

use crate::filelist::FileList;
use crate::lock::DirLock;
use crate::progress::Progress;
use crate::transfer::{download_name, set_mtime};
use psync_types::{
    CancelCheck, CancellationToken, Error, FileOperation, FileType, MetadataOperation, Result,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, trace};

/// Backup number of every regular file moved out of the tree
pub type Backups = BTreeMap<String, usize>;

/// File name of a backup inside the lock folder
pub fn backup_name(n: usize, name: &str) -> String {
    let base = name.rsplit_once('/').map_or(name, |(_, base)| base);
    format!("{},{}", n, base)
}

/// Apply every download recorded in `list` to the tree at `root`
pub fn commit(
    root: &Path,
    lock: &DirLock,
    list: &FileList,
    token: &CancellationToken,
    removed: &mut Progress<'_>,
    copied: &mut Progress<'_>,
) -> Result<Backups> {
    let backups = remove_replaced(root, lock.path(), list, token, removed)?;
    install_downloads(root, lock.path(), list, token, copied)?;
    stamp_directories(root, list, token)?;

    token.check()?;
    let pending = lock.work_file(crate::lock::LAST_FILE);
    let last = lock.last_file();
    fs::rename(&pending, &last)
        .map_err(|e| Error::metadata(MetadataOperation::Write, &last, e))?;
    debug!(
        "Committed '{}' with {} backups",
        root.display(),
        backups.len()
    );
    Ok(backups)
}

fn remove_replaced(
    root: &Path,
    work_dir: &Path,
    list: &FileList,
    token: &CancellationToken,
    progress: &mut Progress<'_>,
) -> Result<Backups> {
    let mut backups = Backups::new();
    for (name, record) in list.iter().rev() {
        if !record.flags.needs_download() {
            continue;
        }
        token.check()?;
        let path = root.join(name);
        match record.flags.local_type() {
            FileType::Regular => {
                let n = backups.len() + 1;
                let backup = work_dir.join(backup_name(n, name));
                fs::rename(&path, &backup)
                    .map_err(|e| Error::file(FileOperation::Move, &path, e))?;
                trace!("Backed up '{}' as '{}'", name, backup.display());
                backups.insert(name.clone(), n);
                progress.add(1);
            }
            FileType::Symlink => {
                fs::remove_file(&path).map_err(|e| Error::file(FileOperation::Remove, &path, e))?;
                progress.add(1);
            }
            FileType::Directory if record.flags.remote_type() != FileType::Directory => {
                fs::remove_dir(&path).map_err(|e| Error::file(FileOperation::Remove, &path, e))?;
            }
            _ => {}
        }
    }
    Ok(backups)
}

fn install_downloads(
    root: &Path,
    work_dir: &Path,
    list: &FileList,
    token: &CancellationToken,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let mut count = 0;
    for (name, record) in list {
        if !record.flags.needs_download() {
            continue;
        }
        token.check()?;
        let path = root.join(name);
        match record.flags.remote_type() {
            FileType::Regular | FileType::Symlink => {
                count += 1;
                let download = work_dir.join(download_name(count));
                fs::rename(&download, &path)
                    .map_err(|e| Error::file(FileOperation::Move, &path, e))?;
                progress.add(1);
            }
            FileType::Directory if record.flags.local_type() == FileType::Directory => {
                fs::set_permissions(&path, fs::Permissions::from_mode(record.permissions()))
                    .map_err(|e| Error::file(FileOperation::StatWrite, &path, e))?;
            }
            FileType::Directory => {
                DirBuilder::new()
                    .mode(record.permissions())
                    .create(&path)
                    .map_err(|e| Error::file(FileOperation::Make, &path, e))?;
                progress.add(1);
            }
            FileType::None => {}
        }
    }
    Ok(())
}

fn stamp_directories(root: &Path, list: &FileList, token: &CancellationToken) -> Result<()> {
    let touched: BTreeSet<&str> = list
        .iter()
        .filter(|(_, record)| record.flags.needs_download())
        .filter_map(|(name, _)| name.rsplit_once('/').map(|(parent, _)| parent))
        .collect();

    for (name, record) in list.iter().rev() {
        let download = record.flags.needs_download();
        let final_type = if download {
            record.flags.remote_type()
        } else {
            record.flags.local_type()
        };
        if final_type == FileType::Directory && (download || touched.contains(name.as_str())) {
            token.check()?;
            set_mtime(&root.join(name), record.mtime, false)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::DEFAULT_INTERVAL;
    use filetime::FileTime;
    use psync_types::{CounterTag, FileRecord, Flags, NullSink};
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn download(flags: u8, mode: u32, mtime: i64) -> FileRecord {
        FileRecord {
            revision: mtime,
            mtime,
            mode,
            size: 0,
            flags: Flags::from_bits(0x80 | flags),
        }
    }

    fn run_commit(root: &Path, lock: &DirLock, list: &FileList) -> Result<Backups> {
        let sink = NullSink;
        let mut removed = Progress::new(&sink, CounterTag::Removed, DEFAULT_INTERVAL);
        let mut copied = Progress::new(&sink, CounterTag::Copied, DEFAULT_INTERVAL);
        commit(root, lock, list, &CancellationToken::new(), &mut removed, &mut copied)
    }

    #[test]
    fn test_backup_name_uses_basename() {
        assert_eq!(backup_name(3, "docs/a/report.txt"), "3,report.txt");
        assert_eq!(backup_name(1, "top"), "1,top");
    }

    #[test]
    fn test_commit_applies_every_kind() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let lock = DirLock::acquire(root).unwrap();

        // modified file, deleted file, deleted symlink, dir replaced by file
        fs::write(root.join("mod.txt"), "old").unwrap();
        fs::write(root.join("del.txt"), "bye").unwrap();
        symlink("mod.txt", root.join("del.lnk")).unwrap();
        fs::create_dir(root.join("swap")).unwrap();
        // downloads staged in the lock folder
        fs::write(lock.work_file("d1"), "new").unwrap();
        fs::write(lock.work_file("d2"), "swapped").unwrap();
        fs::write(lock.work_file("last"), "").unwrap();

        let mut list = FileList::new();
        list.put("del.lnk", download(0x03, 0, 0)).unwrap();
        list.put("del.txt", download(0x01, 0, 0)).unwrap();
        list.put("mod.txt", download(0x11, 0o100644, 50)).unwrap();
        list.put("newdir", download(0x20, 0o040750, 60)).unwrap();
        list.put("swap", download(0x12, 0o100644, 70)).unwrap();

        let backups = run_commit(root, &lock, &list).unwrap();

        assert_eq!(fs::read_to_string(root.join("mod.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(root.join("swap")).unwrap(), "swapped");
        assert!(!root.join("del.txt").exists());
        assert!(root.join("del.lnk").symlink_metadata().is_err());

        // reverse order: mod.txt is backed up before del.txt
        assert_eq!(backups.get("mod.txt"), Some(&1));
        assert_eq!(backups.get("del.txt"), Some(&2));
        assert_eq!(fs::read_to_string(lock.work_file("1,mod.txt")).unwrap(), "old");
        assert_eq!(fs::read_to_string(lock.work_file("2,del.txt")).unwrap(), "bye");

        let newdir = fs::metadata(root.join("newdir")).unwrap();
        assert!(newdir.is_dir());
        assert_eq!(FileTime::from_last_modification_time(&newdir).unix_seconds(), 60);

        assert!(root.join(".psync/last").is_file());
        assert!(!lock.work_file("last").exists());
    }

    #[test]
    fn test_nested_directories_created_parent_first() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let lock = DirLock::acquire(root).unwrap();
        fs::write(lock.work_file("d1"), "deep").unwrap();
        fs::write(lock.work_file("last"), "").unwrap();

        let mut list = FileList::new();
        list.put("a", download(0x20, 0o040755, 10)).unwrap();
        list.put("a/b", download(0x20, 0o040755, 20)).unwrap();
        list.put("a/b/c.txt", download(0x10, 0o100644, 30)).unwrap();

        run_commit(root, &lock, &list).unwrap();
        assert_eq!(fs::read_to_string(root.join("a/b/c.txt")).unwrap(), "deep");
        let a = fs::metadata(root.join("a")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&a).unix_seconds(), 10);
    }

    #[test]
    fn test_deleted_directory_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let lock = DirLock::acquire(root).unwrap();
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("x/y/f"), "f").unwrap();
        fs::write(lock.work_file("last"), "").unwrap();

        let mut list = FileList::new();
        list.put("x", download(0x02, 0, 0)).unwrap();
        list.put("x/y", download(0x02, 0, 0)).unwrap();
        list.put("x/y/f", download(0x01, 0, 0)).unwrap();

        let backups = run_commit(root, &lock, &list).unwrap();
        assert!(!root.join("x").exists());
        assert_eq!(fs::read_to_string(lock.work_file("1,f")).unwrap(), "f");
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_parent_mtime_restored_after_install() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let lock = DirLock::acquire(root).unwrap();
        fs::create_dir_all(root.join("d/e")).unwrap();
        fs::write(root.join("d/e/x.txt"), "old").unwrap();
        fs::write(root.join("d/gone.txt"), "bye").unwrap();
        fs::write(lock.work_file("d1"), "new").unwrap();
        fs::write(lock.work_file("last"), "").unwrap();

        let kept_dir = |mtime| FileRecord {
            revision: mtime,
            mtime,
            mode: 0o040755,
            size: 0,
            flags: Flags::from_bits(0x22),
        };
        let mut list = FileList::new();
        list.put("d", kept_dir(40)).unwrap();
        list.put("d/e", kept_dir(45)).unwrap();
        list.put("d/e/x.txt", download(0x11, 0o100644, 50)).unwrap();
        list.put("d/gone.txt", download(0x01, 0, 0)).unwrap();

        run_commit(root, &lock, &list).unwrap();
        assert_eq!(fs::read_to_string(root.join("d/e/x.txt")).unwrap(), "new");
        for (dir, mtime) in [("d", 40), ("d/e", 45)] {
            let meta = fs::metadata(root.join(dir)).unwrap();
            assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), mtime);
        }
    }

    #[test]
    fn test_cancelled_commit_keeps_previous_state() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let lock = DirLock::acquire(root).unwrap();
        fs::write(lock.work_file("last"), "").unwrap();

        let mut list = FileList::new();
        let uploaded = FileRecord {
            revision: 5,
            mtime: 5,
            mode: 0o100644,
            size: 0,
            flags: Flags::from_bits(0x19),
        };
        list.put("sent.txt", uploaded).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let sink = NullSink;
        let mut removed = Progress::new(&sink, CounterTag::Removed, DEFAULT_INTERVAL);
        let mut copied = Progress::new(&sink, CounterTag::Copied, DEFAULT_INTERVAL);
        let error = commit(root, &lock, &list, &token, &mut removed, &mut copied).unwrap_err();

        assert!(matches!(error, Error::Cancelled));
        assert!(!lock.last_file().exists());
        assert!(lock.work_file("last").exists());
    }

    #[test]
    fn test_missing_pending_state_fails() {
        let temp_dir = TempDir::new().unwrap();
        let lock = DirLock::acquire(temp_dir.path()).unwrap();
        let error = run_commit(temp_dir.path(), &lock, &FileList::new()).unwrap_err();
        assert_eq!(error.code(), -19);
    }
}
