//! Persisted file list of the last successful sync

use crate::filelist::FileList;
use filetime::FileTime;
use psync_io::{read_magic, write_magic};
use psync_types::{CancellationToken, Error, MetadataOperation, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, warn};

/// Identifier at the start of a persisted list (`pSf\x01`)
pub const FILE_MAGIC: u32 = 0x0166_5370;

/// List loaded from disk
#[derive(Debug, Default)]
pub struct SyncedState {
    /// Records as of the last successful sync
    pub list: FileList,
    /// Modification time of the state file, 0 if there is none
    pub last_sync_time: i64,
}

/// Load the persisted list at `path`
///
/// A missing file or one with a foreign identifier counts as "never
/// synced". A file with a valid identifier must parse completely.
pub fn load(path: &Path, token: &CancellationToken) -> Result<SyncedState> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            debug!("No sync state at '{}'", path.display());
            return Ok(SyncedState::default());
        }
        Err(e) => return Err(Error::metadata(MetadataOperation::Open, path, e)),
    };
    let modified = file
        .metadata()
        .map_err(|e| Error::metadata(MetadataOperation::Read, path, e))?;
    let mut reader = BufReader::new(file);

    match read_magic(&mut reader) {
        Ok(FILE_MAGIC) => {}
        _ => {
            warn!("Ignoring sync state '{}' with unknown format", path.display());
            return Ok(SyncedState::default());
        }
    }

    let list = FileList::deserialize(&mut reader, false, token).map_err(|e| match e {
        Error::Cancelled => e,
        other => Error::metadata(MetadataOperation::Read, path, other),
    })?;
    debug!("Loaded {} records from '{}'", list.len(), path.display());

    Ok(SyncedState {
        list,
        last_sync_time: FileTime::from_last_modification_time(&modified).unix_seconds(),
    })
}

/// Write `list` to a new file at `path` and stamp it with `now`
pub fn persist(path: &Path, list: &FileList, now: i64, token: &CancellationToken) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| Error::metadata(MetadataOperation::Make, path, e))?;
    let mut writer = BufWriter::new(file);

    write_magic(&mut writer, FILE_MAGIC)
        .and_then(|()| list.serialize(&mut writer, false, token))
        .map_err(|e| match e {
            Error::Cancelled => e,
            other => Error::metadata(MetadataOperation::Write, path, other),
        })?;
    drop(writer);

    let time = FileTime::from_unix_time(now, 0);
    filetime::set_file_times(path, time, time)
        .map_err(|e| Error::metadata(MetadataOperation::Write, path, e))?;
    debug!("Persisted {} records to '{}'", list.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use psync_types::{FileRecord, Flags};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn sample() -> FileList {
        let mut list = FileList::new();
        list.put(
            "a.txt",
            FileRecord {
                revision: 100,
                mtime: 90,
                mode: 0o100644,
                size: 3,
                flags: Flags::from_bits(0x81),
            },
        )
        .unwrap();
        list.put("gone", FileRecord::tombstone(120)).unwrap();
        list
    }

    #[test]
    fn test_persist_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("last");
        let token = CancellationToken::new();
        persist(&path, &sample(), 1_600_000_000, &token).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
        assert_eq!(&fs::read(&path).unwrap()[..4], b"pSf\x01");

        let state = load(&path, &token).unwrap();
        assert_eq!(state.last_sync_time, 1_600_000_000);
        let record = state.list.get("a.txt").unwrap();
        assert_eq!((record.revision, record.mtime, record.mode), (100, 90, 0o100644));
        assert_eq!(record.size, 0);
        assert_eq!(record.flags, Flags::empty());
        assert!(state.list.get("gone").unwrap().is_tombstone());
    }

    #[test]
    fn test_missing_file_is_never_synced() {
        let temp_dir = TempDir::new().unwrap();
        let state = load(&temp_dir.path().join("last"), &CancellationToken::new()).unwrap();
        assert!(state.list.is_empty());
        assert_eq!(state.last_sync_time, 0);
    }

    #[test]
    fn test_foreign_file_is_never_synced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("last");
        fs::write(&path, b"not a state file").unwrap();
        let state = load(&path, &CancellationToken::new()).unwrap();
        assert!(state.list.is_empty());
    }

    #[test]
    fn test_truncated_file_is_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("last");
        persist(&path, &sample(), 1, &CancellationToken::new()).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let error = load(&path, &CancellationToken::new()).unwrap_err();
        assert_eq!(error.code(), -20);
    }

    #[test]
    fn test_persist_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("last");
        fs::write(&path, b"").unwrap();
        let error = persist(&path, &sample(), 1, &CancellationToken::new()).unwrap_err();
        assert_eq!(error.code(), -17);
    }
}
