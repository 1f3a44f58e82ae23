//! Unified test utilities for psync integration tests

use filetime::FileTime;
use psync_io::WireDuplex;
use psync_protocol::{DirectoryEntry, DirectoryRegistry, NegotiationReport, Negotiator};
use psync_sync::{metadata, FileList, STATE_DIR};
use psync_types::{BufferSize, CancellationToken, MemorySink, Result, SyncMode, TimeoutConfig};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Directory name both test peers register
pub const DIR_NAME: &str = "shared";

/// Poll timeout of the test streams, short enough to fail a stuck test
pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

/// What a tree holds at one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Regular file content
    File(Vec<u8>),
    /// Directory
    Dir,
    /// Symlink target
    Link(PathBuf),
}

/// One side of a test synchronization
#[derive(Debug)]
pub struct TestPeer {
    dir: TempDir,
}

impl TestPeer {
    /// Create a peer with an empty tree
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Root of the synchronized tree
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a tree entry
    pub fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    /// Registry offering this tree as [`DIR_NAME`]
    pub fn registry(&self) -> DirectoryRegistry {
        let mut registry = DirectoryRegistry::new(BufferSize::default(), Duration::from_secs(3600));
        registry
            .add(DirectoryEntry {
                name: DIR_NAME.to_string(),
                path: self.root().to_path_buf(),
                expire: Duration::from_secs(400 * 86_400),
                backup: Duration::from_secs(3 * 86_400),
            })
            .expect("Failed to register test directory");
        registry
    }

    /// Write a file, creating parent directories
    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(path, content).expect("Failed to write test file");
    }

    /// Write a file and set its modification time
    pub fn write_with_mtime(&self, name: &str, content: impl AsRef<[u8]>, mtime: i64) {
        self.write(name, content);
        set_mtime(&self.path(name), mtime);
    }

    /// Create a symlink
    pub fn link(&self, name: &str, target: &str) {
        symlink(target, self.path(name)).expect("Failed to create symlink");
    }

    /// Content of a regular file, if it exists
    pub fn read(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.path(name)).ok()
    }

    /// Every entry of the tree except the state folder
    pub fn snapshot(&self) -> BTreeMap<String, Entry> {
        let root = self.root();
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == STATE_DIR))
            .map(|e| e.expect("Failed to walk test tree"))
            .map(|e| {
                let name = e
                    .path()
                    .strip_prefix(root)
                    .expect("Entry outside the tree")
                    .to_string_lossy()
                    .into_owned();
                let entry = if e.path_is_symlink() {
                    Entry::Link(fs::read_link(e.path()).expect("Failed to read symlink"))
                } else if e.file_type().is_dir() {
                    Entry::Dir
                } else {
                    Entry::File(fs::read(e.path()).expect("Failed to read test file"))
                };
                (name, entry)
            })
            .collect()
    }

    /// File list committed by the last completed round
    pub fn synced(&self) -> FileList {
        let path = self.root().join(STATE_DIR).join("last");
        metadata::load(&path, &CancellationToken::new())
            .expect("Failed to load synced state")
            .list
    }

    /// Backup snapshot folders left in the state folder
    pub fn snapshots(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = fs::read_dir(self.root().join(STATE_DIR))
            .map(|dir| {
                dir.filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect()
            })
            .unwrap_or_default();
        folders.sort();
        folders
    }
}

impl Default for TestPeer {
    fn default() -> Self {
        Self::new()
    }
}

/// Set the modification time of a path without following symlinks
pub fn set_mtime(path: &Path, mtime: i64) {
    let time = FileTime::from_unix_time(mtime, 0);
    filetime::set_symlink_file_times(path, time, time).expect("Failed to set mtime");
}

/// Outcome of one test run on both sides
#[derive(Debug)]
pub struct PairOutcome {
    /// Result of the first peer
    pub left: Result<NegotiationReport>,
    /// Result of the second peer
    pub right: Result<NegotiationReport>,
    /// Status lines emitted by the first peer
    pub left_status: Vec<String>,
}

/// Run both registries against each other over a socket pair
pub fn sync_registries(left: &DirectoryRegistry, right: &DirectoryRegistry) -> PairOutcome {
    sync_registries_with_mode(left, right, SyncMode::Sync)
}

/// Run both registries with the first one requesting `mode`
///
/// The second one always runs like `psync serve` and follows the request.
pub fn sync_registries_with_mode(
    left: &DirectoryRegistry,
    right: &DirectoryRegistry,
    mode: SyncMode,
) -> PairOutcome {
    let (a, b) = UnixStream::pair().expect("Failed to create socket pair");
    let timeout = TimeoutConfig::new(TEST_TIMEOUT).expect("Invalid timeout");
    let sink = MemorySink::new();

    let (left_result, right_result) = thread::scope(|s| {
        let peer = s.spawn(move || {
            let mut duplex = WireDuplex::from_socket(b, timeout, BufferSize::default())
                .expect("Failed to wrap socket");
            let (reader, writer) = duplex.split();
            Negotiator::new(right, &MemorySink::new(), CancellationToken::new())
                .run(reader, writer)
        });
        let mut duplex = WireDuplex::from_socket(a, timeout, BufferSize::default())
            .expect("Failed to wrap socket");
        let (reader, writer) = duplex.split();
        let local = Negotiator::new(left, &sink, CancellationToken::new())
            .with_mode(mode)
            .run(reader, writer);
        drop(duplex);
        (local, peer.join().expect("Peer thread panicked"))
    });

    PairOutcome {
        left: left_result,
        right: right_result,
        left_status: sink.lines().iter().map(ToString::to_string).collect(),
    }
}

/// Synchronize two peers' trees
pub fn sync_peers(left: &TestPeer, right: &TestPeer) -> PairOutcome {
    sync_registries(&left.registry(), &right.registry())
}

/// Push (`Put`) or pull (`Get`) the first peer's tree
pub fn sync_peers_with_mode(left: &TestPeer, right: &TestPeer, mode: SyncMode) -> PairOutcome {
    sync_registries_with_mode(&left.registry(), &right.registry(), mode)
}

/// Report of the single shared directory, panicking on any failure
pub fn expect_synced(report: &Result<NegotiationReport>) -> &psync_sync::SyncReport {
    let report = report.as_ref().expect("Negotiation failed");
    assert_eq!(report.directories.len(), 1, "{:?}", report);
    report.directories[0]
        .result
        .as_ref()
        .expect("Directory was not synchronized")
}

/// Deterministic file content of the given size
pub fn generate_test_data(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| ((i * 7 + 13) as u8).wrapping_add(seed))
        .collect()
}
