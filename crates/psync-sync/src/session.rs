//! One directory's sync round against a peer
//!
//! [`SyncSession::begin`] takes the lock and loads the last synced list.
//! [`SyncSession::run`] then walks through scan, list exchange, merge,
//! staging, content transfer, commit, change log and backup expiry, and
//! finally releases the lock. The lock is released on every path out of a
//! begun session.
//!
//! Two status checkpoints keep the peers in step: after the local list is
//! built, and after uploads are staged. At each one both sides send their
//! status and stop together if either failed.

use crate::changelog::{self, ChangeSummary};
use crate::collect;
use crate::commit;
use crate::filelist::FileList;
use crate::lock::{DirLock, LAST_FILE, LOG_FILE};
use crate::metadata::{self, SyncedState};
use crate::progress::{Progress, DEFAULT_INTERVAL};
use crate::reconcile;
use crate::scan;
use crate::transfer;
use psync_io::{read_varint, write_varint};
use psync_types::{
    BufferSize, CancellationToken, CounterTag, Error, Result, StatusSink, SyncMode,
    TransferStage,
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Parameters of one directory's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name shared with the peer
    pub name: String,
    /// Root of the local tree
    pub root: PathBuf,
    /// How long deletion tombstones are remembered
    pub expire: Duration,
    /// How long backup snapshots are kept
    pub backup: Duration,
    /// Chunk size for content transfer
    pub buffer_size: BufferSize,
    /// Minimum time between two progress lines of a counter
    pub progress_interval: Duration,
    /// Which side wins, as agreed with the peer
    pub mode: SyncMode,
}

impl SessionConfig {
    /// Session with default retention and transfer settings
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            expire: DAY * 400,
            backup: DAY * 3,
            buffer_size: BufferSize::default(),
            progress_interval: DEFAULT_INTERVAL,
            mode: SyncMode::Sync,
        }
    }
}

/// Outcome of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Changes applied and sent
    pub summary: ChangeSummary,
    /// Content bytes sent to the peer
    pub bytes_uploaded: u64,
    /// Content bytes received from the peer
    pub bytes_downloaded: u64,
    /// Local files moved into the snapshot as backups
    pub backups: usize,
    /// Expired snapshots removed
    pub expired: usize,
    /// Snapshot folder the lock was renamed to
    pub snapshot: PathBuf,
}

/// A locked directory ready to sync
#[derive(Debug)]
pub struct SyncSession {
    config: SessionConfig,
    lock: DirLock,
    synced: SyncedState,
    now: i64,
    token: CancellationToken,
}

impl SyncSession {
    /// Lock the tree and load its last synced list
    pub fn begin(config: SessionConfig, token: CancellationToken) -> Result<Self> {
        let lock = DirLock::acquire(&config.root)?;
        let synced = metadata::load(&lock.last_file(), &token)?;
        debug!(
            "Session '{}' loaded {} synced records",
            config.name,
            synced.list.len()
        );
        Ok(Self {
            config,
            lock,
            synced,
            now: crate::unix_now(),
            token,
        })
    }

    /// Name shared with the peer
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run the round against a peer running the same session
    pub fn run<R, W>(
        self,
        reader: &mut R,
        writer: &mut W,
        sink: &dyn StatusSink,
    ) -> Result<SyncReport>
    where
        R: Read + Send + ?Sized,
        W: Write + Send + ?Sized,
    {
        let Self {
            config,
            lock,
            synced,
            now,
            token,
        } = self;
        let interval = config.progress_interval;
        info!(
            "Synchronizing '{}' at '{}' ({})",
            config.name,
            config.root.display(),
            config.mode
        );

        let local = build_local(&config, synced, now, &token, sink);
        let local = checkpoint(reader, writer, local)?;

        let remote = exchange_lists(&local, reader, writer, &token)
            .map_err(Error::desynchronized)?;
        let merged = reconcile::merge(local, remote, config.mode, now, &token);
        let merged = merged.and_then(|merged| {
            metadata::persist(&lock.work_file(LAST_FILE), &merged, now, &token)?;
            let mut staged = Progress::new(sink, CounterTag::Uploaded, interval);
            transfer::stage(&config.root, lock.path(), &merged, &token, &mut staged)?;
            staged.finish();
            Ok(merged)
        });
        let merged = checkpoint(reader, writer, merged)?;

        let (bytes_uploaded, bytes_downloaded) = thread::scope(|s| {
            let uploader = s.spawn(|| {
                transfer::upload(lock.path(), &merged, writer, config.buffer_size, &token)
            });
            let mut progress = Progress::new(sink, CounterTag::Downloaded, interval);
            let downloaded = transfer::download(
                lock.path(),
                &merged,
                reader,
                config.buffer_size,
                &token,
                &mut progress,
            );
            progress.finish();
            let uploaded = uploader
                .join()
                .map_err(|_| Error::system("Upload thread panicked"))?;
            Ok::<_, Error>((uploaded?, downloaded?))
        })
        .map_err(Error::desynchronized)?;

        let mut removed = Progress::new(sink, CounterTag::Removed, interval);
        let mut copied = Progress::new(sink, CounterTag::Copied, interval);
        let backups = commit::commit(
            &config.root,
            &lock,
            &merged,
            &token,
            &mut removed,
            &mut copied,
        )?;
        removed.finish();
        copied.finish();

        let summary = changelog::write_log(&lock.work_file(LOG_FILE), &merged, &backups, &token)?;
        let expired = collect::collect(lock.state_dir(), now.saturating_sub(secs(config.backup)), &token)?;
        let snapshot = lock.release(now)?;

        info!(
            "Synchronized '{}': {} deleted, {} added, {} modified, {} uploaded",
            config.name, summary.deleted, summary.added, summary.modified, summary.uploaded
        );
        Ok(SyncReport {
            summary,
            bytes_uploaded,
            bytes_downloaded,
            backups: backups.len(),
            expired,
            snapshot,
        })
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Scan the tree and add tombstones for entries deleted since the last sync
fn build_local(
    config: &SessionConfig,
    synced: SyncedState,
    now: i64,
    token: &CancellationToken,
    sink: &dyn StatusSink,
) -> Result<FileList> {
    let mut progress = Progress::new(sink, CounterTag::Scanned, config.progress_interval);
    let local = scan::scan(&config.root, &synced.list, token, &mut progress, sink)?;
    progress.finish();
    reconcile::add_deletions(
        local,
        synced.list,
        synced.last_sync_time,
        now.saturating_sub(secs(config.expire)),
        token,
    )
}

/// Trade stage outcomes with the peer
///
/// Both sides always send their status, so neither waits on a peer that
/// already gave up. The local failure takes precedence over the peer's.
fn checkpoint<T, R, W>(reader: &mut R, writer: &mut W, outcome: Result<T>) -> Result<T>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let code = outcome.as_ref().err().map_or(0, Error::code);
    let peer = write_varint(writer, i64::from(code))
        .and_then(|()| writer.flush().map_err(Error::from))
        .and_then(|()| read_varint(reader));
    let value = outcome?;
    match peer {
        Ok(0) => Ok(value),
        Ok(code) => {
            debug!("Peer abandoned the directory with status {}", code);
            Err(Error::RemoteFailed {
                code: i32::try_from(code).unwrap_or(i32::MIN),
            })
        }
        Err(e) => Err(e.during(TransferStage::StateDownload)),
    }
}

/// Send the local detail list while receiving the peer's
fn exchange_lists<R, W>(
    local: &FileList,
    reader: &mut R,
    writer: &mut W,
    token: &CancellationToken,
) -> Result<FileList>
where
    R: Read + Send + ?Sized,
    W: Write + Send + ?Sized,
{
    thread::scope(|s| {
        let sender = s.spawn(|| local.serialize(writer, true, token));
        let received = FileList::deserialize(reader, true, token)
            .map_err(|e| e.during(TransferStage::StateDownload));
        sender
            .join()
            .map_err(|_| Error::system("List upload thread panicked"))?
            .map_err(|e| e.during(TransferStage::StateUpload))?;
        received
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use psync_types::{ErrorKind, MemorySink, NullSink, Side, StatusLine};
    use std::fs;
    use std::os::unix::net::UnixStream;
    use tempfile::TempDir;

    fn run_pair(a: &TempDir, b: &TempDir) -> (Result<SyncReport>, Result<SyncReport>) {
        let (left, right) = UnixStream::pair().unwrap();
        let token = CancellationToken::new();
        let first = SyncSession::begin(SessionConfig::new("t", a.path()), token.clone()).unwrap();
        let second = SyncSession::begin(SessionConfig::new("t", b.path()), token).unwrap();

        thread::scope(|s| {
            let peer = s.spawn(move || {
                let mut reader = right.try_clone().unwrap();
                let mut writer = right;
                second.run(&mut reader, &mut writer, &NullSink)
            });
            let mut reader = left.try_clone().unwrap();
            let mut writer = left;
            let local = first.run(&mut reader, &mut writer, &NullSink);
            (local, peer.join().unwrap())
        })
    }

    #[test]
    fn test_first_sync_copies_both_ways() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::create_dir(a.path().join("docs")).unwrap();
        fs::write(a.path().join("docs/a.txt"), "from a").unwrap();
        fs::write(b.path().join("b.txt"), "from b").unwrap();

        let (left, right) = run_pair(&a, &b);
        let left = left.unwrap();
        let right = right.unwrap();

        assert_eq!(fs::read_to_string(b.path().join("docs/a.txt")).unwrap(), "from a");
        assert_eq!(fs::read_to_string(a.path().join("b.txt")).unwrap(), "from b");
        assert_eq!(left.summary.uploaded, 2);
        assert_eq!(left.summary.added, 1);
        assert_eq!(right.summary.added, 2);
        assert_eq!(left.bytes_uploaded, right.bytes_downloaded);
        assert!(left.snapshot.join("log").is_file());
        assert!(a.path().join(".psync/last").is_file());
        assert!(!a.path().join(".psync/lock").exists());
    }

    #[test]
    fn test_unsupported_entry_abandons_both_sides() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        nix::unistd::mkfifo(&a.path().join("pipe"), nix::sys::stat::Mode::S_IRWXU).unwrap();
        fs::write(b.path().join("b.txt"), "b").unwrap();

        let (left, right) = run_pair(&a, &b);
        assert_eq!(left.unwrap_err().code(), -2);
        let error = right.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Remote);
        assert!(!a.path().join("b.txt").exists());
        assert!(!b.path().join(".psync/last").exists());
        assert!(!b.path().join(".psync/lock").exists());
    }

    #[test]
    fn test_checkpoint_prefers_local_failure() {
        let mut wire = Vec::new();
        write_varint(&mut wire, -7).unwrap();
        let mut sent = Vec::new();
        let outcome: Result<()> = Err(Error::Cancelled);
        let error = checkpoint(&mut wire.as_slice(), &mut sent, outcome).unwrap_err();
        assert!(matches!(error, Error::Cancelled));
        assert_eq!(sent, [0xa1, 0xe8]);

        let mut sent = Vec::new();
        let error = checkpoint(&mut wire.as_slice(), &mut sent, Ok(())).unwrap_err();
        assert!(matches!(error, Error::RemoteFailed { code: -7 }));
        assert_eq!(sent, [0x80]);
    }

    #[test]
    fn test_begin_on_locked_tree() {
        let a = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let held = SyncSession::begin(SessionConfig::new("t", a.path()), token.clone()).unwrap();
        let error = SyncSession::begin(SessionConfig::new("t", a.path()), token).unwrap_err();
        assert!(matches!(error, Error::NotReady { side: Side::Local }));
        assert_eq!(held.name(), "t");
        drop(held);
        assert!(!a.path().join(".psync/lock").exists());
    }

    #[test]
    fn test_scan_progress_reported() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("x"), "x").unwrap();
        let (left, right) = UnixStream::pair().unwrap();
        let token = CancellationToken::new();
        let first = SyncSession::begin(SessionConfig::new("t", a.path()), token.clone()).unwrap();
        let second = SyncSession::begin(SessionConfig::new("t", b.path()), token).unwrap();
        let sink = MemorySink::new();

        thread::scope(|s| {
            s.spawn(move || {
                let mut reader = right.try_clone().unwrap();
                let mut writer = right;
                second.run(&mut reader, &mut writer, &NullSink).unwrap();
            });
            let mut reader = left.try_clone().unwrap();
            let mut writer = left;
            first.run(&mut reader, &mut writer, &sink).unwrap();
        });

        let lines: Vec<_> = sink.lines().iter().map(ToString::to_string).collect();
        assert_eq!(lines, ["S+1", "U+1"]);
        assert!(sink
            .lines()
            .iter()
            .all(|l| matches!(l, StatusLine::Counter { .. })));
    }
}
