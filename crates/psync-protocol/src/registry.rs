//! Directories offered to the peer

use psync_config::Config;
use psync_io::{read_len, write_blob, write_len};
use psync_sync::SessionConfig;
use psync_types::{BufferSize, CancelCheck, CancellationToken, Error, Result, SyncMode};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Longest directory name accepted from the peer
pub const MAX_NAME_LEN: usize = 4096;

/// One synchronized directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Name shared with the peer
    pub name: String,
    /// Local root of the tree
    pub path: PathBuf,
    /// How long deletion tombstones are remembered
    pub expire: Duration,
    /// How long backup snapshots are kept
    pub backup: Duration,
}

/// Sorted set of directories available for synchronization
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    entries: BTreeMap<String, DirectoryEntry>,
    buffer_size: BufferSize,
    progress_interval: Duration,
}

impl DirectoryRegistry {
    /// Create an empty registry
    pub fn new(buffer_size: BufferSize, progress_interval: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            buffer_size,
            progress_interval,
        }
    }

    /// Build the registry from a loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new(
            config.transport.buffer_size,
            config.transport.progress_interval(),
        );
        for directory in &config.directories {
            let retention = config.retention_for(directory);
            registry.add(DirectoryEntry {
                name: directory.name.clone(),
                path: directory.path.clone(),
                expire: retention.expire,
                backup: retention.backup,
            })?;
        }
        Ok(registry)
    }

    /// Register a directory, rejecting empty and duplicate names
    pub fn add(&mut self, entry: DirectoryEntry) -> Result<()> {
        if entry.name.is_empty() || entry.name.len() > MAX_NAME_LEN {
            return Err(Error::config(format!(
                "Invalid directory name '{}'",
                entry.name
            )));
        }
        if self.entries.contains_key(&entry.name) {
            return Err(Error::config(format!(
                "Directory '{}' is defined twice",
                entry.name
            )));
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Look up a directory by name
    pub fn get(&self, name: &str) -> Option<&DirectoryEntry> {
        self.entries.get(name)
    }

    /// Directories in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DirectoryEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Number of registered directories
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no directory is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Session parameters of a registered directory for an agreed mode
    pub fn session_config(&self, entry: &DirectoryEntry, mode: SyncMode) -> SessionConfig {
        SessionConfig {
            name: entry.name.clone(),
            root: entry.path.clone(),
            expire: entry.expire,
            backup: entry.backup,
            buffer_size: self.buffer_size,
            progress_interval: self.progress_interval,
            mode,
        }
    }

    /// Send the sorted directory names, terminated by an empty name
    pub fn write_names<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        token: &CancellationToken,
    ) -> Result<()> {
        for name in self.entries.keys() {
            token.check()?;
            write_blob(writer, name.as_bytes())?;
        }
        write_len(writer, 0)?;
        writer.flush()?;
        Ok(())
    }
}

/// Receive the peer's sorted directory names
pub fn read_names<R: Read + ?Sized>(reader: &mut R, token: &CancellationToken) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    loop {
        token.check()?;
        let len = read_len(reader, MAX_NAME_LEN as u64)? as usize;
        if len == 0 {
            return Ok(names);
        }
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        let name = String::from_utf8(bytes)
            .map_err(|_| Error::protocol("Directory name is not valid UTF-8"))?;
        if names.last().is_some_and(|last| *last >= name) {
            return Err(Error::protocol(format!(
                "Directory names out of order at '{}'",
                name
            )));
        }
        names.push(name);
    }
}
