//! Local tree scan

use crate::filelist::FileList;
use crate::lock::STATE_DIR;
use crate::progress::Progress;
use nix::unistd::{access, AccessFlags};
use psync_types::{
    CancelCheck, CancellationToken, Error, FileOperation, FileRecord, FileType, Result,
    StatusLine, StatusSink, S_IFMT,
};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Build the current file list of the tree at `root`
///
/// Records of unchanged entries keep the revision from `synced`. A new or
/// modified entry gets `max(ctime, mtime)` as its revision, and every
/// directory's revision is raised to the newest revision beneath it.
///
/// An entry of unsupported type or with insufficient access rights aborts
/// the scan after a `!Unsupported file: <name>` message.
pub fn scan(
    root: &Path,
    synced: &FileList,
    token: &CancellationToken,
    progress: &mut Progress<'_>,
    sink: &dyn StatusSink,
) -> Result<FileList> {
    check_root(root)?;

    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == STATE_DIR));
    for entry in walker {
        token.check()?;
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
            Error::file(FileOperation::StatRead, path, e)
        })?;
        let name = relative_name(root, entry.path(), sink)?;
        let metadata = entry
            .metadata()
            .map_err(|e| Error::file(FileOperation::StatRead, entry.path(), e))?;
        check_entry(entry.path(), &name, &metadata, sink)?;
        entries.push((name, metadata));
    }
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut list = FileList::new();
    let mut cursor = synced.cursor();
    for (name, metadata) in entries {
        token.check()?;
        let file_type = FileType::from_mode(metadata.mode());
        let record = build_record(cursor.seek(&name), &metadata, file_type);
        if file_type != FileType::Directory {
            progress.add(1);
        }
        list.put(name, record)?;
    }

    propagate_directory_revisions(&mut list);
    debug!("Scanned {} entries under '{}'", list.len(), root.display());
    Ok(list)
}

fn check_root(root: &Path) -> Result<()> {
    let metadata = root
        .metadata()
        .map_err(|e| Error::file(FileOperation::StatRead, root, e))?;
    if !metadata.is_dir() {
        return Err(Error::UnsupportedFile {
            path: root.to_path_buf(),
        });
    }
    if access(root, AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK).is_err() {
        return Err(Error::PermissionDenied {
            path: root.to_path_buf(),
        });
    }
    Ok(())
}

fn relative_name(root: &Path, path: &Path, sink: &dyn StatusSink) -> Result<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let name = relative
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| unsupported(relative.to_path_buf(), sink))?;
    Ok(name)
}

fn check_entry(path: &Path, name: &str, metadata: &Metadata, sink: &dyn StatusSink) -> Result<()> {
    let required = match FileType::from_mode(metadata.mode()) {
        FileType::Regular => AccessFlags::R_OK,
        FileType::Directory => AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK,
        FileType::Symlink => return Ok(()),
        FileType::None => return Err(unsupported(PathBuf::from(name), sink)),
    };
    if access(path, required).is_err() {
        warn!("Insufficient access rights on '{}'", path.display());
        sink.emit(&StatusLine::Message(format!("Unsupported file: {}", name)));
        return Err(Error::PermissionDenied {
            path: PathBuf::from(name),
        });
    }
    Ok(())
}

fn unsupported(path: PathBuf, sink: &dyn StatusSink) -> Error {
    warn!("Unsupported file '{}'", path.display());
    sink.emit(&StatusLine::Message(format!(
        "Unsupported file: {}",
        path.display()
    )));
    Error::UnsupportedFile { path }
}

fn build_record(
    previous: Option<&FileRecord>,
    metadata: &Metadata,
    file_type: FileType,
) -> FileRecord {
    let mtime = metadata.mtime();
    let revision = match previous {
        Some(previous) if previous.mtime == mtime => previous.revision,
        _ => metadata.ctime().max(mtime),
    };
    let mut record = FileRecord {
        revision,
        mtime,
        mode: metadata.mode() & (S_IFMT | 0o777),
        size: metadata.size(),
        ..FileRecord::default()
    };
    record.flags.set_local_type(file_type);
    record
}

/// Raise each directory's revision to the newest revision beneath it
///
/// Walking names in descending order visits every descendant before its
/// directory, so one pass carries revisions up the whole tree.
fn propagate_directory_revisions(list: &mut FileList) {
    let names: Vec<String> = list.iter().rev().map(|(name, _)| name.clone()).collect();
    for name in names {
        let Some((parent, _)) = name.rsplit_once('/') else {
            continue;
        };
        let Some(revision) = list.get(&name).map(|r| r.revision) else {
            continue;
        };
        if let Some(parent) = list.get_mut(parent) {
            parent.revision = parent.revision.max(revision);
        }
    }
}
