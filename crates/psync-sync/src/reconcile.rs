//! Deletion detection and two-way merge
//!
//! Both peers run the same rules on mirror-image inputs, so both arrive at
//! the same decision for every name: whatever one side uploads, the other
//! downloads. A forced run pairs [`resolve_put`] on one side with
//! [`resolve_get`] on the other.

use crate::filelist::FileList;
use psync_types::{CancelCheck, CancellationToken, FileRecord, Result, Sets, SyncMode};
use tracing::{debug, trace};

/// Add tombstones for entries that vanished since the last sync
///
/// For every name present only in `synced`: a live record becomes a
/// tombstone with revision `last_sync_time + 1`, an existing tombstone is
/// carried over while its revision is newer than `expire_before`.
pub fn add_deletions(
    local: FileList,
    synced: FileList,
    last_sync_time: i64,
    expire_before: i64,
    token: &CancellationToken,
) -> Result<FileList> {
    let mut result = FileList::new();
    local.merge(synced, |name, class| {
        token.check()?;
        match class {
            Sets::Both(current, _) | Sets::OnlyFirst(current) => result.put(name, current),
            Sets::OnlySecond(previous) if previous.is_tombstone() => {
                if previous.revision > expire_before {
                    result.put(name, FileRecord::tombstone(previous.revision))
                } else {
                    trace!("Tombstone '{}' expired", name);
                    Ok(())
                }
            }
            Sets::OnlySecond(_) => {
                debug!("'{}' deleted since last sync", name);
                result.put(name, FileRecord::tombstone(last_sync_time + 1))
            }
        }
    })?;
    Ok(result)
}

/// Merge the local list with the peer's detail list
///
/// The result holds one record per name, with both type nibbles set and
/// the transfer bit of the side that has to move content. In a forced mode
/// a name missing on the winning side becomes a tombstone at `now` that
/// deletes the other side's copy.
pub fn merge(
    local: FileList,
    remote: FileList,
    mode: SyncMode,
    now: i64,
    token: &CancellationToken,
) -> Result<FileList> {
    let mut merged = FileList::new();
    local.merge(remote, |name, class| {
        token.check()?;
        let record = match (class, mode) {
            (Sets::Both(local, remote), SyncMode::Sync) => resolve(local, remote),
            (Sets::Both(local, remote), SyncMode::Put) => resolve_put(local, remote),
            (Sets::Both(local, remote), SyncMode::Get) => resolve_get(local, remote),
            (Sets::OnlyFirst(local), SyncMode::Get) => {
                trace!("'{}' only exists here, deleting it", name);
                let mut record = withdrawn(local, now);
                record.flags.mark_download();
                record
            }
            (Sets::OnlyFirst(mut local), _) => {
                local.flags.mark_upload();
                local
            }
            (Sets::OnlySecond(remote), SyncMode::Put) => {
                trace!("'{}' only exists on the peer, deleting it there", name);
                let mut record = withdrawn(remote, now);
                record.flags.mark_upload();
                record
            }
            (Sets::OnlySecond(mut remote), _) => {
                remote.flags.mark_download();
                remote
            }
        };
        merged.put(name, record)
    })?;
    Ok(merged)
}

/// Decide between two records of the same name
///
/// The higher revision wins. Equal revisions fall back to the newer mtime,
/// and identical revision and mtime mean nothing moves. Content is only
/// transferred when the winner's mtime differs from the loser's.
pub fn resolve(local: FileRecord, remote: FileRecord) -> FileRecord {
    let local_wins = (local.revision, local.mtime) >= (remote.revision, remote.mtime);
    let (mut winner, loser) = if local_wins {
        (local, remote)
    } else {
        (remote, local)
    };
    winner.flags |= loser.flags;
    if winner.mtime != loser.mtime {
        if local_wins {
            winner.flags.mark_upload();
        } else {
            winner.flags.mark_download();
        }
    }
    winner
}

/// Keep the local record, overwriting the peer's when it differs
///
/// Content moves when both revision and mtime differ, so an entry that
/// was only touched on one side is left alone.
pub fn resolve_put(mut local: FileRecord, remote: FileRecord) -> FileRecord {
    local.flags |= remote.flags;
    if local.revision != remote.revision && local.mtime != remote.mtime {
        local.flags.mark_upload();
    }
    local
}

/// Take the peer's record, overwriting the local copy when it differs
pub fn resolve_get(local: FileRecord, mut remote: FileRecord) -> FileRecord {
    remote.flags |= local.flags;
    if local.revision != remote.revision && local.mtime != remote.mtime {
        remote.flags.mark_download();
    }
    remote
}

/// Tombstone at `now` that keeps the type bits of the entry it replaces
fn withdrawn(record: FileRecord, now: i64) -> FileRecord {
    FileRecord {
        flags: record.flags,
        ..FileRecord::tombstone(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use psync_types::{FileType, Flags};

    fn live(revision: i64, mtime: i64, file_type: FileType) -> FileRecord {
        let mut flags = Flags::empty();
        flags.set_local_type(file_type);
        FileRecord {
            revision,
            mtime,
            mode: 0o100644,
            size: 1,
            flags,
        }
    }

    fn as_remote(record: FileRecord) -> FileRecord {
        FileRecord {
            flags: record.flags.swapped(),
            ..record
        }
    }

    #[test]
    fn test_deleted_entry_becomes_tombstone() {
        let mut synced = FileList::new();
        synced.put("kept", live(5, 5, FileType::Regular)).unwrap();
        synced.put("removed", live(5, 5, FileType::Regular)).unwrap();
        let mut local = FileList::new();
        local.put("kept", live(5, 5, FileType::Regular)).unwrap();

        let list = add_deletions(local, synced, 900, 0, &CancellationToken::new()).unwrap();
        let removed = list.get("removed").unwrap();
        assert!(removed.is_tombstone());
        assert_eq!(removed.revision, 901);
        assert_eq!((removed.mtime, removed.size), (0, 0));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_tombstone_expiry() {
        let mut synced = FileList::new();
        synced.put("old", FileRecord::tombstone(100)).unwrap();
        synced.put("recent", FileRecord::tombstone(300)).unwrap();

        let list = add_deletions(FileList::new(), synced, 500, 200, &CancellationToken::new())
            .unwrap();
        assert!(list.get("old").is_none());
        assert_eq!(list.get("recent").unwrap().revision, 300);
    }

    #[test]
    fn test_newer_remote_is_downloaded() {
        let merged = resolve(
            live(10, 10, FileType::Regular),
            as_remote(live(20, 20, FileType::Regular)),
        );
        assert_eq!(merged.revision, 20);
        assert!(merged.flags.needs_download());
        assert!(!merged.flags.needs_upload());
        assert_eq!(merged.flags.local_type(), FileType::Regular);
        assert_eq!(merged.flags.remote_type(), FileType::Regular);
    }

    #[test]
    fn test_newer_revision_same_mtime_moves_nothing() {
        let merged = resolve(
            live(30, 10, FileType::Regular),
            as_remote(live(20, 10, FileType::Regular)),
        );
        assert_eq!(merged.revision, 30);
        assert!(!merged.flags.needs_upload());
        assert!(!merged.flags.needs_download());
    }

    #[test]
    fn test_equal_revision_breaks_tie_by_mtime() {
        let merged = resolve(
            live(20, 15, FileType::Regular),
            as_remote(live(20, 12, FileType::Regular)),
        );
        assert!(merged.flags.needs_upload());
        assert_eq!(merged.mtime, 15);

        let identical = resolve(
            live(20, 15, FileType::Regular),
            as_remote(live(20, 15, FileType::Directory)),
        );
        assert!(!identical.flags.needs_upload());
        assert!(!identical.flags.needs_download());
    }

    #[test]
    fn test_one_sided_names() {
        let mut local = FileList::new();
        local.put("mine", live(1, 1, FileType::Regular)).unwrap();
        let mut remote = FileList::new();
        remote.put("theirs", as_remote(live(1, 1, FileType::Symlink))).unwrap();

        let merged = merge(local, remote, SyncMode::Sync, 0, &CancellationToken::new()).unwrap();
        assert!(merged.get("mine").unwrap().flags.needs_upload());
        let theirs = merged.get("theirs").unwrap();
        assert!(theirs.flags.needs_download());
        assert_eq!(theirs.flags.remote_type(), FileType::Symlink);
        assert_eq!(theirs.flags.local_type(), FileType::None);
    }

    #[test]
    fn test_put_overrides_newer_peer() {
        let merged = resolve_put(
            live(10, 10, FileType::Regular),
            as_remote(live(20, 20, FileType::Regular)),
        );
        assert_eq!((merged.revision, merged.mtime), (10, 10));
        assert!(merged.flags.needs_upload());
        assert!(!merged.flags.needs_download());

        let untouched = resolve_get(
            live(10, 10, FileType::Regular),
            as_remote(live(20, 10, FileType::Regular)),
        );
        assert_eq!(untouched.revision, 20);
        assert!(!untouched.flags.needs_download());
    }

    #[test]
    fn test_forced_modes_delete_one_sided_names() {
        let lists = || {
            let mut local = FileList::new();
            local.put("mine", live(1, 1, FileType::Regular)).unwrap();
            let mut remote = FileList::new();
            remote.put("theirs", as_remote(live(1, 1, FileType::Directory))).unwrap();
            (local, remote)
        };
        let token = CancellationToken::new();

        let (local, remote) = lists();
        let put = merge(local, remote, SyncMode::Put, 777, &token).unwrap();
        assert!(put.get("mine").unwrap().flags.needs_upload());
        let theirs = put.get("theirs").unwrap();
        assert!(theirs.is_tombstone());
        assert_eq!(theirs.revision, 777);
        assert!(theirs.flags.needs_upload());
        assert_eq!(theirs.flags.remote_type(), FileType::Directory);

        let (local, remote) = lists();
        let get = merge(local, remote, SyncMode::Get, 777, &token).unwrap();
        assert!(get.get("theirs").unwrap().flags.needs_download());
        let mine = get.get("mine").unwrap();
        assert!(mine.is_tombstone());
        assert!(mine.flags.needs_download());
        assert_eq!(mine.flags.local_type(), FileType::Regular);
        assert_eq!(mine.flags.remote_type(), FileType::None);
    }

    fn arb_record() -> impl Strategy<Value = FileRecord> {
        (0i64..4, 0i64..4, 0u8..4).prop_map(|(revision, mtime, kind)| {
            live(revision, mtime, FileType::from_bits(kind))
        })
    }

    proptest! {
        #[test]
        fn test_peers_agree(a in arb_record(), b in arb_record()) {
            let on_a = resolve(a, as_remote(b));
            let on_b = resolve(b, as_remote(a));

            prop_assert_eq!(on_a.flags.swapped(), on_b.flags);
            prop_assert_eq!(on_a.revision, on_b.revision);
            prop_assert_eq!(on_a.mtime, on_b.mtime);
            prop_assert!(!(on_a.flags.needs_upload() && on_a.flags.needs_download()));
        }

        #[test]
        fn test_forced_peers_agree(a in arb_record(), b in arb_record()) {
            let pushed = resolve_put(a, as_remote(b));
            let pulled = resolve_get(b, as_remote(a));

            prop_assert_eq!(pushed.flags.swapped(), pulled.flags);
            prop_assert_eq!(pushed.revision, pulled.revision);
            prop_assert!(!pushed.flags.needs_download());
        }
    }
}
