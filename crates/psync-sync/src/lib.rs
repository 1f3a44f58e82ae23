//! Bidirectional directory synchronization for psync
//!
//! This crate implements one directory's sync round between two peers that
//! run the same code on either end of a byte stream:
//!
//! - **File lists**: sorted records of every entry with revision, mtime,
//!   mode and size, persisted between rounds
//! - **Change detection**: revisions carried over for unchanged entries,
//!   tombstones for deletions, expiry of old tombstones
//! - **Reconciliation**: a merge both peers agree on, deciding per entry
//!   which side sends its content
//! - **Crash-safe commit**: uploads snapshotted and downloads received
//!   into a lock folder before the tree is touched, replaced files kept
//!   as backups
//! - **Progress reporting**: throttled counters on a status sink
//!
//! # Examples
//!
//! ```rust,no_run
//! use psync_sync::{SessionConfig, SyncSession};
//! use psync_types::{CancellationToken, NullSink};
//! use std::os::unix::net::UnixStream;
//!
//! # fn example(stream: UnixStream) -> Result<(), Box<dyn std::error::Error>> {
//! let session = SyncSession::begin(
//!     SessionConfig::new("docs", "/home/user/docs"),
//!     CancellationToken::new(),
//! )?;
//! let mut reader = stream.try_clone()?;
//! let mut writer = stream;
//! let report = session.run(&mut reader, &mut writer, &NullSink)?;
//! println!("{} files received", report.summary.added + report.summary.modified);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod changelog;
pub mod collect;
pub mod commit;
pub mod filelist;
pub mod lock;
pub mod metadata;
pub mod progress;
pub mod reconcile;
pub mod scan;
pub mod session;
pub mod transfer;

pub use changelog::ChangeSummary;
pub use commit::Backups;
pub use filelist::{Cursor, FileList, MAX_NAME_LEN};
pub use lock::{DirLock, STATE_DIR};
pub use metadata::{SyncedState, FILE_MAGIC};
pub use progress::Progress;
pub use session::{SessionConfig, SyncReport, SyncSession};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in whole seconds since the Unix epoch
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
