//! Self-describing integer and blob encoding
//!
//! An integer is one header byte `0b10s_nnnnn` followed by `n` magnitude
//! bytes, most significant first. `s` marks a negative value whose elided
//! leading bytes are `0xff`; positive values elide leading zero bytes. Zero
//! is the single byte `0x80` and `-1` the single byte `0xa0`.

use psync_types::{Error, Result};
use std::io::{Read, Write};

const HEADER_TAG: u8 = 0x80;
const HEADER_MASK: u8 = 0xc0;
const SIGN_BIT: u8 = 0x20;
const COUNT_MASK: u8 = 0x1f;

/// Largest number of magnitude bytes after the header
pub const MAX_VARINT_BYTES: usize = std::mem::size_of::<i64>();

/// Encode `value` into `buf`, returning the encoded length
pub fn encode_varint(value: i64, buf: &mut [u8; 1 + MAX_VARINT_BYTES]) -> usize {
    let mut magnitude = [0u8; MAX_VARINT_BYTES];
    let mut count = 0;
    let mut rest = value;
    let header = if value < 0 {
        while rest < -1 {
            magnitude[count] = (rest & 0xff) as u8;
            rest >>= 8;
            count += 1;
        }
        HEADER_TAG | SIGN_BIT
    } else {
        while rest > 0 {
            magnitude[count] = (rest & 0xff) as u8;
            rest >>= 8;
            count += 1;
        }
        HEADER_TAG
    };
    buf[0] = header | count as u8;
    for (slot, byte) in buf[1..=count].iter_mut().zip(magnitude[..count].iter().rev()) {
        *slot = *byte;
    }
    count + 1
}

/// Write one integer
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: i64) -> Result<()> {
    let mut buf = [0u8; 1 + MAX_VARINT_BYTES];
    let len = encode_varint(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(())
}

/// Read one integer
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<i64> {
    let mut header = [0u8; 1];
    reader.read_exact(&mut header)?;
    let header = header[0];
    if header & HEADER_MASK != HEADER_TAG {
        return Err(Error::protocol(format!(
            "Invalid integer header 0x{:02x}",
            header
        )));
    }
    let count = usize::from(header & COUNT_MASK);
    if count > MAX_VARINT_BYTES {
        return Err(Error::protocol(format!(
            "Integer of {} bytes exceeds {} bytes",
            count, MAX_VARINT_BYTES
        )));
    }
    let mut magnitude = [0u8; MAX_VARINT_BYTES];
    reader.read_exact(&mut magnitude[..count])?;

    let start: i64 = if header & SIGN_BIT == 0 { 0 } else { -1 };
    Ok(magnitude[..count]
        .iter()
        .fold(start, |acc, byte| (acc << 8) | i64::from(*byte)))
}

/// Write an unsigned length or count
pub fn write_len<W: Write + ?Sized>(writer: &mut W, len: usize) -> Result<()> {
    let len = i64::try_from(len).map_err(|_| Error::resource(format!("Length {} too large", len)))?;
    write_varint(writer, len)
}

/// Read an unsigned length no larger than `limit`
pub fn read_len<R: Read + ?Sized>(reader: &mut R, limit: u64) -> Result<u64> {
    let value = read_varint(reader)?;
    match u64::try_from(value) {
        Ok(len) if len <= limit => Ok(len),
        _ => Err(Error::protocol(format!(
            "Length {} outside 0..={}",
            value, limit
        ))),
    }
}

/// Write a length-prefixed byte string
pub fn write_blob<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    write_len(writer, bytes.len())?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Read a length-prefixed byte string of at most `limit` bytes
pub fn read_blob<R: Read + ?Sized>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let len = read_len(reader, limit as u64)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Write a four-byte identifier
pub fn write_magic<W: Write + ?Sized>(writer: &mut W, magic: u32) -> Result<()> {
    writer.write_all(&magic.to_le_bytes())?;
    Ok(())
}

/// Read a four-byte identifier
pub fn read_magic<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}
