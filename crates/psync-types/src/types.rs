//! File-state records and their flag bits

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// File type mask of a POSIX `st_mode`
pub const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Kind of directory entry a record describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    /// Entry does not exist (deletion tombstone)
    #[default]
    None,
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

impl FileType {
    /// Three-bit encoding used in [`Flags`]
    pub const fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Regular => 1,
            Self::Directory => 2,
            Self::Symlink => 3,
        }
    }

    /// Decode the low three bits of a type nibble
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => Self::Regular,
            2 => Self::Directory,
            3 => Self::Symlink,
            _ => Self::None,
        }
    }

    /// Type encoded in a `st_mode` value
    pub const fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            _ => Self::None,
        }
    }

    /// Suffix used by the change log (`/` for directories, `@` for symlinks)
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Directory => "/",
            Self::Symlink => "@",
            _ => "",
        }
    }
}

/// Per-record flag byte
///
/// Bits 0-2 hold the local type, bits 4-6 the remote type, bit 3 marks an
/// upload and bit 7 a download.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flags(u8);

impl Flags {
    /// Local type mask
    pub const LOCAL_TYPE: u8 = 0x07;
    /// Upload-needed bit
    pub const UPLOAD: u8 = 0x08;
    /// Remote type mask
    pub const REMOTE_TYPE: u8 = 0x70;
    /// Download-needed bit
    pub const DOWNLOAD: u8 = 0x80;

    /// No bits set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap a raw flag byte
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Type of the entry in the local tree
    pub const fn local_type(self) -> FileType {
        FileType::from_bits(self.0 & Self::LOCAL_TYPE)
    }

    /// Type of the entry in the remote tree
    pub const fn remote_type(self) -> FileType {
        FileType::from_bits((self.0 & Self::REMOTE_TYPE) >> 4)
    }

    /// Replace the local type bits
    pub fn set_local_type(&mut self, file_type: FileType) {
        self.0 = (self.0 & !Self::LOCAL_TYPE) | file_type.bits();
    }

    /// Replace the remote type bits
    pub fn set_remote_type(&mut self, file_type: FileType) {
        self.0 = (self.0 & !Self::REMOTE_TYPE) | (file_type.bits() << 4);
    }

    /// Whether the record's content must be sent to the peer
    pub const fn needs_upload(self) -> bool {
        self.0 & Self::UPLOAD != 0
    }

    /// Whether the record's content must be received from the peer
    pub const fn needs_download(self) -> bool {
        self.0 & Self::DOWNLOAD != 0
    }

    /// Schedule an upload
    pub fn mark_upload(&mut self) {
        self.0 |= Self::UPLOAD;
    }

    /// Schedule a download
    pub fn mark_download(&mut self) {
        self.0 |= Self::DOWNLOAD;
    }

    /// Same flags seen from the peer's vantage point
    ///
    /// Swapping the nibbles exchanges local and remote types, and turns an
    /// upload into a download.
    pub const fn swapped(self) -> Self {
        Self(self.0.rotate_left(4))
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flags")
            .field("local", &self.local_type())
            .field("remote", &self.remote_type())
            .field("upload", &self.needs_upload())
            .field("download", &self.needs_download())
            .finish()
    }
}

/// State of one pathname inside a synchronized tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRecord {
    /// Time of the most recent content-affecting change
    pub revision: i64,
    /// Modification time as reported by the filesystem
    pub mtime: i64,
    /// Type and permission bits, zero for a tombstone
    pub mode: u32,
    /// File size or symlink target length
    pub size: u64,
    /// Type and transfer flags
    pub flags: Flags,
}

impl FileRecord {
    /// Deletion tombstone created at `revision`
    pub fn tombstone(revision: i64) -> Self {
        Self {
            revision,
            ..Self::default()
        }
    }

    /// Whether the record marks a deleted entry
    pub const fn is_tombstone(&self) -> bool {
        self.mode & S_IFMT == 0
    }

    /// Type encoded in `mode`
    pub const fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    /// Permission bits of `mode`
    pub const fn permissions(&self) -> u32 {
        self.mode & 0o777
    }
}
