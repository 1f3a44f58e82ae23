//! Per-directory lock folder
//!
//! A session owns its tree while `.psync/lock` exists. The lock folder also
//! holds the session's work files (staged uploads, downloads, backups, the
//! pending state file and the change log). Releasing the lock renames the
//! folder to a timestamp so it stays behind as a backup snapshot.

use chrono::{Local, TimeZone};
use filetime::FileTime;
use psync_types::{Error, MetadataOperation, Result, Side};
use std::fs::{self, DirBuilder};
use std::io::ErrorKind as IoErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the metadata folder at the root of a synchronized tree
pub const STATE_DIR: &str = ".psync";
/// Name of the lock folder inside [`STATE_DIR`]
pub const LOCK_DIR: &str = "lock";
/// Name of the persisted file list
pub const LAST_FILE: &str = "last";
/// Name of the change log inside the lock folder
pub const LOG_FILE: &str = "log";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M.%S%z";
const SNAPSHOT_ATTEMPTS: usize = 100;

/// Exclusive hold on one synchronized tree
#[derive(Debug)]
pub struct DirLock {
    state_dir: PathBuf,
    lock_dir: PathBuf,
    released: bool,
}

impl DirLock {
    /// Create `.psync/lock`, failing with a local not-ready error if it exists
    pub fn acquire(root: &Path) -> Result<Self> {
        let state_dir = root.join(STATE_DIR);
        let lock_dir = state_dir.join(LOCK_DIR);

        let mut builder = DirBuilder::new();
        builder.mode(0o700);
        match builder.create(&state_dir) {
            Ok(()) => info!("Created state folder '{}'", state_dir.display()),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {}
            Err(e) => return Err(Error::metadata(MetadataOperation::Make, &state_dir, e)),
        }

        match builder.create(&lock_dir) {
            Ok(()) => {
                debug!("Locked '{}'", root.display());
                Ok(Self {
                    state_dir,
                    lock_dir,
                    released: false,
                })
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                warn!("Directory '{}' is locked by another session", root.display());
                Err(Error::NotReady { side: Side::Local })
            }
            Err(e) => Err(Error::metadata(MetadataOperation::Make, &lock_dir, e)),
        }
    }

    /// The `.psync` folder
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// The lock folder holding the session's work files
    pub fn path(&self) -> &Path {
        &self.lock_dir
    }

    /// Path of a work file inside the lock folder
    pub fn work_file(&self, name: &str) -> PathBuf {
        self.lock_dir.join(name)
    }

    /// Persisted file list of the last successful sync
    pub fn last_file(&self) -> PathBuf {
        self.state_dir.join(LAST_FILE)
    }

    /// Stamp the lock folder with `now` and rename it to a backup snapshot
    ///
    /// Returns the snapshot path.
    pub fn release(mut self, now: i64) -> Result<PathBuf> {
        self.released = true;
        self.rename_to_snapshot(now)
    }

    fn rename_to_snapshot(&self, now: i64) -> Result<PathBuf> {
        let time = FileTime::from_unix_time(now, 0);
        filetime::set_file_times(&self.lock_dir, time, time)
            .map_err(|e| Error::metadata(MetadataOperation::Write, &self.lock_dir, e))?;

        let stamp = Local
            .timestamp_opt(now, 0)
            .single()
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| now.to_string());

        let pid = std::process::id();
        let mut last_error = None;
        for attempt in 0..SNAPSHOT_ATTEMPTS {
            let name = match attempt {
                0 => stamp.clone(),
                1 => format!("{}-{}", stamp, pid),
                n => format!("{}-{}-{}", stamp, pid, n),
            };
            let snapshot = self.state_dir.join(name);
            if snapshot.exists() {
                continue;
            }
            match fs::rename(&self.lock_dir, &snapshot) {
                Ok(()) => {
                    debug!("Unlocked into '{}'", snapshot.display());
                    return Ok(snapshot);
                }
                Err(e) => last_error = Some(e),
            }
        }
        let message = last_error.map_or_else(
            || "every snapshot name is taken".to_string(),
            |e| e.to_string(),
        );
        Err(Error::metadata(MetadataOperation::Write, &self.lock_dir, message))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.rename_to_snapshot(crate::unix_now()) {
            warn!("Failed to release lock '{}': {}", self.lock_dir.display(), e);
        }
    }
}
