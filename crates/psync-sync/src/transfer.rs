//! Content staging, upload and download
//!
//! Uploads are snapshotted into the lock folder (`u<N>`) before any content
//! moves, and downloads land in the lock folder (`d<N>`) until commit.
//! `N` counts the records of each kind in list order starting at 1, so the
//! uploader's sequence matches the peer's download sequence.

use crate::filelist::FileList;
use crate::progress::Progress;
use filetime::FileTime;
use psync_io::{read_len, write_len};
use psync_types::{
    BufferSize, CancelCheck, CancellationToken, Error, FileOperation, FileRecord, FileType,
    Result, TransferStage,
};
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, trace};

/// Longest symlink target accepted from the peer
pub const MAX_LINK_LEN: u64 = 4096;

/// Work file name of the `n`-th staged upload
pub fn upload_name(n: usize) -> String {
    format!("u{}", n)
}

/// Work file name of the `n`-th download
pub fn download_name(n: usize) -> String {
    format!("d{}", n)
}

fn uploads(list: &FileList) -> impl Iterator<Item = (&String, &FileRecord)> {
    list.iter().filter(|(_, r)| {
        r.flags.needs_upload()
            && matches!(r.flags.local_type(), FileType::Regular | FileType::Symlink)
    })
}

fn downloads(list: &FileList) -> impl Iterator<Item = (&String, &FileRecord)> {
    list.iter().filter(|(_, r)| {
        r.flags.needs_download()
            && matches!(r.flags.remote_type(), FileType::Regular | FileType::Symlink)
    })
}

/// Snapshot every upload into `work_dir`
///
/// Regular files are hard-linked, symlinks re-created with the same target.
pub fn stage(
    root: &Path,
    work_dir: &Path,
    list: &FileList,
    token: &CancellationToken,
    progress: &mut Progress<'_>,
) -> Result<()> {
    for (n, (name, record)) in (1..).zip(uploads(list)) {
        token.check()?;
        let source = root.join(name);
        let staged = work_dir.join(upload_name(n));
        if record.flags.local_type() == FileType::Regular {
            fs::hard_link(&source, &staged)
                .map_err(|e| Error::file(FileOperation::Link, &source, e))?;
        } else {
            let target =
                fs::read_link(&source).map_err(|e| Error::file(FileOperation::Read, &source, e))?;
            if target.as_os_str().len() as u64 != record.size {
                return Err(Error::file(
                    FileOperation::Read,
                    &source,
                    "symlink changed during sync",
                ));
            }
            symlink(&target, &staged).map_err(|e| Error::file(FileOperation::Write, &staged, e))?;
        }
        trace!("Staged '{}' as '{}'", name, staged.display());
        progress.add(record.size);
    }
    Ok(())
}

/// Send the content of every staged upload, deleting each after sending
///
/// Every entry is a length followed by that many raw bytes: file content
/// for regular files, the target for symlinks.
pub fn upload<W: Write + ?Sized>(
    work_dir: &Path,
    list: &FileList,
    writer: &mut W,
    buffer: BufferSize,
    token: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; buffer.get()];
    let mut sent = 0;
    for (n, (name, record)) in (1..).zip(uploads(list)) {
        token.check()?;
        let staged = work_dir.join(upload_name(n));
        if record.flags.local_type() == FileType::Regular {
            sent += send_file(&staged, writer, &mut buf, token)?;
        } else {
            let target =
                fs::read_link(&staged).map_err(|e| Error::file(FileOperation::Read, &staged, e))?;
            let bytes = target.as_os_str().as_bytes();
            write_len(writer, bytes.len())
                .and_then(|()| writer.write_all(bytes).map_err(Error::from))
                .map_err(|e| e.during(TransferStage::FileUpload))?;
            sent += bytes.len() as u64;
        }
        fs::remove_file(&staged).map_err(|e| Error::file(FileOperation::Remove, &staged, e))?;
        trace!("Uploaded '{}'", name);
    }
    writer
        .flush()
        .map_err(|e| Error::from(e).during(TransferStage::FileUpload))?;
    debug!("Uploaded {} bytes", sent);
    Ok(sent)
}

fn send_file<W: Write + ?Sized>(
    path: &Path,
    writer: &mut W,
    buf: &mut [u8],
    token: &CancellationToken,
) -> Result<u64> {
    let mut file = File::open(path).map_err(|e| Error::file(FileOperation::Open, path, e))?;
    let len = file
        .metadata()
        .map_err(|e| Error::file(FileOperation::StatRead, path, e))?
        .len();
    write_len(writer, len as usize).map_err(|e| e.during(TransferStage::FileUpload))?;

    let mut remaining = len;
    while remaining > 0 {
        token.check()?;
        let chunk = remaining.min(buf.len() as u64) as usize;
        let read = file
            .read(&mut buf[..chunk])
            .map_err(|e| Error::file(FileOperation::Read, path, e))?;
        if read == 0 {
            return Err(Error::file(
                FileOperation::Read,
                path,
                "file shrank during sync",
            ));
        }
        writer
            .write_all(&buf[..read])
            .map_err(|e| Error::from(e).during(TransferStage::FileUpload))?;
        remaining -= read as u64;
    }
    Ok(len)
}

/// Receive every download into `work_dir`
///
/// Regular files are created with mode 0600, filled, then given the
/// record's permission bits. Both kinds get the record's mtime.
pub fn download<R: Read + ?Sized>(
    work_dir: &Path,
    list: &FileList,
    reader: &mut R,
    buffer: BufferSize,
    token: &CancellationToken,
    progress: &mut Progress<'_>,
) -> Result<u64> {
    let mut buf = vec![0u8; buffer.get()];
    let mut received = 0;
    for (n, (name, record)) in (1..).zip(downloads(list)) {
        token.check()?;
        let path = work_dir.join(download_name(n));
        if record.flags.remote_type() == FileType::Regular {
            let len = read_len(reader, i64::MAX as u64)
                .map_err(|e| e.during(TransferStage::FileDownload))?;
            receive_file(&path, record, len, reader, &mut buf, token, progress)?;
            received += len;
        } else {
            let len = read_len(reader, MAX_LINK_LEN)
                .map_err(|e| e.during(TransferStage::FileDownload))?;
            let mut target = vec![0u8; len as usize];
            reader
                .read_exact(&mut target)
                .map_err(|e| Error::from(e).during(TransferStage::FileDownload))?;
            symlink(OsStr::from_bytes(&target), &path)
                .map_err(|e| Error::file(FileOperation::Write, &path, e))?;
            progress.add(len);
            received += len;
        }
        set_mtime(&path, record.mtime, record.flags.remote_type() == FileType::Symlink)?;
        trace!("Downloaded '{}' as '{}'", name, path.display());
    }
    debug!("Downloaded {} bytes", received);
    Ok(received)
}

fn receive_file<R: Read + ?Sized>(
    path: &Path,
    record: &FileRecord,
    len: u64,
    reader: &mut R,
    buf: &mut [u8],
    token: &CancellationToken,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| Error::file(FileOperation::Make, path, e))?;

    let mut remaining = len;
    while remaining > 0 {
        token.check()?;
        let chunk = remaining.min(buf.len() as u64) as usize;
        reader
            .read_exact(&mut buf[..chunk])
            .map_err(|e| Error::from(e).during(TransferStage::FileDownload))?;
        file.write_all(&buf[..chunk])
            .map_err(|e| Error::file(FileOperation::Write, path, e))?;
        progress.add(chunk as u64);
        remaining -= chunk as u64;
    }

    fs::set_permissions(path, fs::Permissions::from_mode(record.permissions()))
        .map_err(|e| Error::file(FileOperation::StatWrite, path, e))
}

/// Set access and modification time of `path`, without following a symlink
pub(crate) fn set_mtime(path: &Path, mtime: i64, is_symlink: bool) -> Result<()> {
    let time = FileTime::from_unix_time(mtime, 0);
    let result = if is_symlink {
        filetime::set_symlink_file_times(path, time, time)
    } else {
        filetime::set_file_times(path, time, time)
    };
    result.map_err(|e| Error::file(FileOperation::StatWrite, path, e))
}
