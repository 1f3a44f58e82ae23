//! Sorted file-state lists
//!
//! A [`FileList`] maps relative pathnames (`/`-separated, no leading slash)
//! to [`FileRecord`]s and always iterates in ascending byte order of the
//! name. That order puts every directory before its contents, which the
//! commit passes rely on.

use psync_io::{read_len, read_varint, write_blob, write_len, write_varint};
use psync_types::{
    merge_join, CancelCheck, CancellationToken, Error, FileRecord, Flags, Result, Sets,
};
use std::collections::btree_map::{self, BTreeMap};
use std::io::{Read, Write};
use std::iter::Peekable;

/// Longest pathname accepted in a list
pub const MAX_NAME_LEN: usize = 4096;

/// Ordered collection of file-state records keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileList {
    records: BTreeMap<String, FileRecord>,
}

impl FileList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the list has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record stored under `name`
    pub fn get(&self, name: &str) -> Option<&FileRecord> {
        self.records.get(name)
    }

    /// Mutable record stored under `name`
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FileRecord> {
        self.records.get_mut(name)
    }

    /// Insert a zero-initialized record at its sorted position
    ///
    /// An existing record of the same name is reset.
    pub fn insert(&mut self, name: impl Into<String>) -> Result<&mut FileRecord> {
        let name = name.into();
        validate_name(&name)?;
        let slot = self.records.entry(name).or_default();
        *slot = FileRecord::default();
        Ok(slot)
    }

    /// Store `record` under `name`, replacing any previous record
    pub fn put(&mut self, name: impl Into<String>, record: FileRecord) -> Result<()> {
        let name = name.into();
        validate_name(&name)?;
        self.records.insert(name, record);
        Ok(())
    }

    /// Remove and return the record stored under `name`
    pub fn remove(&mut self, name: &str) -> Option<FileRecord> {
        self.records.remove(name)
    }

    /// Records in ascending name order
    pub fn iter(&self) -> btree_map::Iter<'_, String, FileRecord> {
        self.records.iter()
    }

    /// Forward-only cursor starting before the first record
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            inner: self.records.iter().peekable(),
        }
    }

    /// Consume two lists, visiting every distinct name once in order
    pub fn merge<F>(self, other: FileList, mut visit: F) -> Result<()>
    where
        F: FnMut(String, Sets<FileRecord, FileRecord>) -> Result<()>,
    {
        for (name, class) in merge_join(self.records, other.records) {
            visit(name, class)?;
        }
        Ok(())
    }

    /// Write the list followed by the end-of-list marker
    ///
    /// The compact form carries name, revision, mtime and mode. The detail
    /// form adds size and flags, with the type nibbles swapped so the
    /// receiver reads them from its own vantage point.
    pub fn serialize<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        detail: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        for (name, record) in &self.records {
            token.check()?;
            write_blob(writer, name.as_bytes())?;
            write_varint(writer, record.revision)?;
            write_varint(writer, record.mtime)?;
            write_varint(writer, i64::from(record.mode))?;
            if detail {
                write_varint(writer, record.size as i64)?;
                write_varint(writer, i64::from(record.flags.swapped().bits()))?;
            }
        }
        write_len(writer, 0)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a list written by [`FileList::serialize`] with the same `detail`
    pub fn deserialize<R: Read + ?Sized>(
        reader: &mut R,
        detail: bool,
        token: &CancellationToken,
    ) -> Result<Self> {
        let mut list = Self::new();
        let mut previous: Option<String> = None;
        loop {
            token.check()?;
            let len = read_len(reader, MAX_NAME_LEN as u64)? as usize;
            if len == 0 {
                return Ok(list);
            }
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes)?;
            let name = String::from_utf8(bytes)
                .map_err(|_| Error::protocol("File name is not valid UTF-8"))?;
            if previous.as_deref().is_some_and(|p| p >= name.as_str()) {
                return Err(Error::protocol(format!(
                    "File list out of order at '{}'",
                    name
                )));
            }

            let mut record = FileRecord {
                revision: read_varint(reader)?,
                mtime: read_varint(reader)?,
                mode: read_field(reader, "mode")?,
                ..FileRecord::default()
            };
            if detail {
                record.size = read_field(reader, "size")?;
                record.flags = Flags::from_bits(read_field(reader, "flags")?);
            }
            list.records.insert(name.clone(), record);
            previous = Some(name);
        }
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = (&'a String, &'a FileRecord);
    type IntoIter = btree_map::Iter<'a, String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::protocol("File name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::resource(format!(
            "File name of {} bytes exceeds {} bytes",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn read_field<R, T>(reader: &mut R, field: &str) -> Result<T>
where
    R: Read + ?Sized,
    T: TryFrom<i64>,
{
    let value = read_varint(reader)?;
    T::try_from(value).map_err(|_| Error::protocol(format!("Invalid {} {}", field, value)))
}

/// Forward-only position in a [`FileList`]
#[derive(Debug)]
pub struct Cursor<'a> {
    inner: Peekable<btree_map::Iter<'a, String, FileRecord>>,
}

impl<'a> Cursor<'a> {
    /// Advance to the first record whose name is not below `name`
    ///
    /// Returns the record on an exact match. Targets must be sought in
    /// ascending order.
    pub fn seek(&mut self, name: &str) -> Option<&'a FileRecord> {
        while self.inner.next_if(|(key, _)| key.as_str() < name).is_some() {}
        self.inner
            .peek()
            .filter(|&&(key, _)| key.as_str() == name)
            .map(|&(_, record)| record)
    }

    /// Name of the record at the cursor
    pub fn position(&mut self) -> Option<&'a str> {
        self.inner.peek().map(|&(key, _)| key.as_str())
    }
}
