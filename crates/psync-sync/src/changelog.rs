//! Human-readable record of a sync round
//!
//! The log lives in the lock folder, so it ends up inside the round's
//! backup snapshot next to the backups it refers to.

use crate::commit::{backup_name, Backups};
use crate::filelist::FileList;
use psync_types::{
    CancelCheck, CancellationToken, Error, FileRecord, FileType, MetadataOperation, Result,
};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Counts of changes applied to and sent from one tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Local entries removed because the peer deleted them
    pub deleted: usize,
    /// Entries created from the peer's tree
    pub added: usize,
    /// Local entries replaced by the peer's version
    pub modified: usize,
    /// Entries the peer receives from this tree
    pub uploaded: usize,
}

impl ChangeSummary {
    /// Tally the transfer flags of a merged list
    pub fn from_list(list: &FileList) -> Self {
        let mut summary = Self::default();
        for (_, record) in list {
            match change_of(record) {
                Some(Change::Deleted) => summary.deleted += 1,
                Some(Change::Added) => summary.added += 1,
                Some(Change::Modified) => summary.modified += 1,
                Some(Change::Uploaded) => summary.uploaded += 1,
                None => {}
            }
        }
        summary
    }
}

enum Change {
    Deleted,
    Added,
    Modified,
    Uploaded,
}

fn change_of(record: &FileRecord) -> Option<Change> {
    let local = record.flags.local_type();
    let remote = record.flags.remote_type();
    if record.flags.needs_upload() {
        return Some(Change::Uploaded);
    }
    if !record.flags.needs_download() {
        return None;
    }
    match (local, remote) {
        (FileType::None, FileType::None) => None,
        (_, FileType::None) => Some(Change::Deleted),
        (FileType::None, _) => Some(Change::Added),
        _ => Some(Change::Modified),
    }
}

/// One log line for `name`, if the record changed anything
pub fn log_line(name: &str, record: &FileRecord, backups: &Backups) -> Option<String> {
    let local = record.flags.local_type();
    let remote = record.flags.remote_type();
    let backup = || {
        backups
            .get(name)
            .map(|n| format!(" -> {}", backup_name(*n, name)))
            .unwrap_or_default()
    };

    let line = match change_of(record)? {
        Change::Deleted => format!("D {}{}{}", name, local.marker(), backup()),
        Change::Added => format!("A {}{}", name, remote.marker()),
        Change::Modified => format!("M {}{}{}", name, remote.marker(), backup()),
        Change::Uploaded => {
            let marker = if local == FileType::None {
                "%"
            } else {
                local.marker()
            };
            format!("U {}{}", name, marker)
        }
    };
    Some(line)
}

/// Write the change log of a committed round to `path`
pub fn write_log(
    path: &Path,
    list: &FileList,
    backups: &Backups,
    token: &CancellationToken,
) -> Result<ChangeSummary> {
    let summary = ChangeSummary::from_list(list);
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{} deleted, {} added, {} modified / {} uploaded",
        summary.deleted, summary.added, summary.modified, summary.uploaded
    );
    for (name, record) in list {
        token.check()?;
        if let Some(line) = log_line(name, record, backups) {
            text.push_str(&line);
            text.push('\n');
        }
    }

    let file = File::create(path).map_err(|e| Error::metadata(MetadataOperation::Make, path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(text.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|e| Error::metadata(MetadataOperation::Write, path, e))?;
    Ok(summary)
}
