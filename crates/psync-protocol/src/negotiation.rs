//! Directory negotiation over one peer stream
//!
//! After the greeting both peers settle the run mode and trade their
//! directory names, and every name registered on both sides is synchronized
//! in ascending order. Each
//! directory is framed on the status sink by `[name` and `]`, with a `!code`
//! line in between when it did not complete.

use crate::protocol::{agree_mode, greet};
use crate::registry::{read_names, DirectoryEntry, DirectoryRegistry};
use psync_io::{read_varint, write_varint};
use psync_sync::{SyncReport, SyncSession};
use psync_types::{
    merge_join, CancelCheck, CancellationToken, Error, Result, Sets, Side, StatusLine,
    StatusSink, SyncMode, TransferStage,
};
use std::io::{Read, Write};
use std::thread;
use tracing::{debug, info, warn};

/// Result of one common directory
#[derive(Debug)]
pub struct DirectoryOutcome {
    /// Directory name
    pub name: String,
    /// Session report, or why the directory was skipped
    pub result: Result<SyncReport>,
}

/// Results of a whole negotiation
#[derive(Debug, Default)]
pub struct NegotiationReport {
    /// One outcome per common directory, in name order
    pub directories: Vec<DirectoryOutcome>,
}

impl NegotiationReport {
    /// Number of directories that completed
    pub fn synced(&self) -> usize {
        self.directories.iter().filter(|d| d.result.is_ok()).count()
    }

    /// Process exit status of the most severe directory failure
    pub fn exit_code(&self) -> i32 {
        self.directories
            .iter()
            .filter_map(|d| d.result.as_ref().err())
            .map(Error::exit_code)
            .max()
            .unwrap_or(0)
    }
}

/// Drives the negotiation for one side of the stream
pub struct Negotiator<'a> {
    registry: &'a DirectoryRegistry,
    sink: &'a dyn StatusSink,
    token: CancellationToken,
    mode: SyncMode,
}

impl<'a> Negotiator<'a> {
    /// Create a negotiator over the local registry
    pub fn new(
        registry: &'a DirectoryRegistry,
        sink: &'a dyn StatusSink,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            sink,
            token,
            mode: SyncMode::Sync,
        }
    }

    /// Request a forced direction from the peer
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Negotiate and synchronize every common directory
    ///
    /// Returns early only when the stream itself can no longer be trusted.
    pub fn run<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<NegotiationReport>
    where
        R: Read + Send + ?Sized,
        W: Write + Send + ?Sized,
    {
        self.token.check()?;
        greet(reader, writer)?;
        let mode = agree_mode(reader, writer, self.mode)?;
        let remote = self.exchange_names(reader, writer)?;

        let common: Vec<&DirectoryEntry> = merge_join(
            self.registry.iter(),
            remote.iter().map(|name| (name.as_str(), ())),
        )
        .filter_map(|(_, class)| match class {
            Sets::Both(entry, ()) => Some(entry),
            _ => None,
        })
        .collect();
        info!(
            "{} of {} local directories are shared with the peer",
            common.len(),
            self.registry.len()
        );

        let mut report = NegotiationReport::default();
        for entry in common {
            self.token.check()?;
            self.sink.emit(&StatusLine::Begin(entry.name.clone()));
            let result = self.sync_directory(entry, mode, reader, writer);
            if let Err(e) = &result {
                warn!("Directory '{}' not synchronized: {}", entry.name, e);
                self.sink.emit(&StatusLine::Code(e.code()));
            }
            self.sink.emit(&StatusLine::End);

            match result {
                Err(e) if e.breaks_stream() => return Err(e),
                result => report.directories.push(DirectoryOutcome {
                    name: entry.name.clone(),
                    result,
                }),
            }
        }
        Ok(report)
    }

    fn exchange_names<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<Vec<String>>
    where
        R: Read + Send + ?Sized,
        W: Write + Send + ?Sized,
    {
        thread::scope(|s| {
            let sender = s.spawn(|| self.registry.write_names(writer, &self.token));
            let received =
                read_names(reader, &self.token).map_err(|e| e.during(TransferStage::StateDownload));
            sender
                .join()
                .map_err(|_| Error::system("Name upload thread panicked"))?
                .map_err(|e| e.during(TransferStage::StateUpload))?;
            received
        })
    }

    fn sync_directory<R, W>(
        &self,
        entry: &DirectoryEntry,
        mode: SyncMode,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<SyncReport>
    where
        R: Read + Send + ?Sized,
        W: Write + Send + ?Sized,
    {
        let session = SyncSession::begin(self.registry.session_config(entry, mode), self.token.clone());
        let ready = if session.is_ok() { 0 } else { -1 };
        let peer = write_varint(writer, ready)
            .and_then(|()| writer.flush().map_err(Error::from))
            .and_then(|()| read_varint(reader))
            .map_err(|e| Error::protocol(format!("Readiness exchange failed: {}", e)))?;

        let session = session?;
        if peer != 0 {
            debug!("Peer is not ready for '{}'", entry.name);
            return Err(Error::NotReady { side: Side::Remote });
        }
        session.run(reader, writer, self.sink)
    }
}

impl std::fmt::Debug for Negotiator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("registry", &self.registry)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psync_types::{BufferSize, MemorySink};
    use std::fs;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(dirs: &[(&str, &TempDir)]) -> DirectoryRegistry {
        let mut registry = DirectoryRegistry::new(BufferSize::default(), Duration::from_secs(60));
        for (name, dir) in dirs {
            registry
                .add(DirectoryEntry {
                    name: (*name).to_string(),
                    path: dir.path().to_path_buf(),
                    expire: Duration::from_secs(400 * 86_400),
                    backup: Duration::from_secs(3 * 86_400),
                })
                .unwrap();
        }
        registry
    }

    fn negotiate(
        left: &DirectoryRegistry,
        right: &DirectoryRegistry,
    ) -> (Result<NegotiationReport>, Result<NegotiationReport>, Vec<String>) {
        negotiate_modes(left, right, SyncMode::Sync, SyncMode::Sync)
    }

    fn negotiate_modes(
        left: &DirectoryRegistry,
        right: &DirectoryRegistry,
        left_mode: SyncMode,
        right_mode: SyncMode,
    ) -> (Result<NegotiationReport>, Result<NegotiationReport>, Vec<String>) {
        let (a, b) = UnixStream::pair().unwrap();
        let sink = MemorySink::new();
        let (first, second) = thread::scope(|s| {
            let peer = s.spawn(move || {
                let mut reader = b.try_clone().unwrap();
                let mut writer = b;
                Negotiator::new(right, &MemorySink::new(), CancellationToken::new())
                    .with_mode(right_mode)
                    .run(&mut reader, &mut writer)
            });
            let mut reader = a.try_clone().unwrap();
            let mut writer = a;
            let local = Negotiator::new(left, &sink, CancellationToken::new())
                .with_mode(left_mode)
                .run(&mut reader, &mut writer);
            (local, peer.join().unwrap())
        });
        let lines = sink.lines().iter().map(ToString::to_string).collect();
        (first, second, lines)
    }

    #[test]
    fn test_only_common_directories_sync() {
        let docs_a = TempDir::new().unwrap();
        let docs_b = TempDir::new().unwrap();
        let music = TempDir::new().unwrap();
        let video = TempDir::new().unwrap();
        fs::write(docs_a.path().join("note.txt"), "hi").unwrap();

        let left = registry(&[("docs", &docs_a), ("music", &music)]);
        let right = registry(&[("docs", &docs_b), ("video", &video)]);
        let (first, second, lines) = negotiate(&left, &right);

        let first = first.unwrap();
        assert_eq!(first.directories.len(), 1);
        assert_eq!(first.synced(), 1);
        assert_eq!(first.exit_code(), 0);
        assert_eq!(second.unwrap().synced(), 1);
        assert_eq!(lines.first().map(String::as_str), Some("[docs"));
        assert_eq!(lines.last().map(String::as_str), Some("]"));
        assert_eq!(fs::read_to_string(docs_b.path().join("note.txt")).unwrap(), "hi");
        assert!(!music.path().join(".psync").exists());
    }

    #[test]
    fn test_locked_directory_is_skipped() {
        let docs_a = TempDir::new().unwrap();
        let docs_b = TempDir::new().unwrap();
        let notes_a = TempDir::new().unwrap();
        let notes_b = TempDir::new().unwrap();
        fs::create_dir_all(docs_b.path().join(".psync/lock")).unwrap();
        fs::write(notes_a.path().join("n"), "n").unwrap();

        let left = registry(&[("docs", &docs_a), ("notes", &notes_a)]);
        let right = registry(&[("docs", &docs_b), ("notes", &notes_b)]);
        let (first, second, lines) = negotiate(&left, &right);

        let first = first.unwrap();
        assert!(matches!(
            first.directories[0].result,
            Err(Error::NotReady { side: Side::Remote })
        ));
        assert!(first.directories[1].result.is_ok());
        assert_eq!(first.exit_code(), 0);
        assert_eq!(lines[..3], ["[docs", "!+2", "]"]);

        let second = second.unwrap();
        assert!(matches!(
            second.directories[0].result,
            Err(Error::NotReady { side: Side::Local })
        ));
        assert!(notes_b.path().join("n").is_file());
        assert!(docs_b.path().join(".psync/lock").is_dir());
    }

    #[test]
    fn test_get_replaces_local_tree() {
        let docs_a = TempDir::new().unwrap();
        let docs_b = TempDir::new().unwrap();
        fs::write(docs_a.path().join("stale.txt"), "stale").unwrap();
        fs::write(docs_b.path().join("fresh.txt"), "fresh").unwrap();

        let left = registry(&[("docs", &docs_a)]);
        let right = registry(&[("docs", &docs_b)]);
        let (first, second, _) = negotiate_modes(&left, &right, SyncMode::Get, SyncMode::Sync);

        assert_eq!(first.unwrap().synced(), 1);
        assert_eq!(second.unwrap().synced(), 1);
        assert_eq!(fs::read_to_string(docs_a.path().join("fresh.txt")).unwrap(), "fresh");
        assert!(!docs_a.path().join("stale.txt").exists());
        assert!(!docs_b.path().join("stale.txt").exists());
    }

    #[test]
    fn test_conflicting_modes_stop_both_sides() {
        let docs_a = TempDir::new().unwrap();
        let docs_b = TempDir::new().unwrap();
        let left = registry(&[("docs", &docs_a)]);
        let right = registry(&[("docs", &docs_b)]);

        let (first, second, lines) = negotiate_modes(&left, &right, SyncMode::Put, SyncMode::Put);
        assert_eq!(first.unwrap_err().code(), -25);
        assert_eq!(second.unwrap_err().code(), -25);
        assert!(lines.is_empty());
        assert!(!docs_a.path().join(".psync").exists());
    }

    #[test]
    fn test_greeting_failure_is_fatal() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer = b.try_clone().unwrap();
        writer.write_all(b"nope").unwrap();
        drop(writer);
        drop(b);

        let left = registry(&[]);
        let mut reader = a.try_clone().unwrap();
        let mut writer = a;
        let error = Negotiator::new(&left, &MemorySink::new(), CancellationToken::new())
            .run(&mut reader, &mut writer)
            .unwrap_err();
        assert_eq!(error.code(), -25);
    }
}
