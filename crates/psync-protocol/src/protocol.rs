//! Protocol identification and run mode agreement

use psync_io::{read_magic, read_varint, write_magic, write_varint};
use psync_types::{Error, Result, SyncMode};
use std::io::{Read, Write};
use tracing::debug;

/// Identifier both peers send first (`pSp` followed by the version)
pub const PROTOCOL_MAGIC: u32 = 0x0370_5370;

/// Protocol version carried in the high byte of [`PROTOCOL_MAGIC`]
pub const PROTOCOL_VERSION: u8 = (PROTOCOL_MAGIC >> 24) as u8;

/// Exchange protocol identifiers with the peer
///
/// Any failure, including an I/O error, is a protocol error.
pub fn greet<R, W>(reader: &mut R, writer: &mut W) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    write_magic(writer, PROTOCOL_MAGIC)
        .and_then(|()| writer.flush().map_err(Error::from))
        .map_err(|e| Error::protocol(format!("Failed to send greeting: {}", e)))?;
    let magic =
        read_magic(reader).map_err(|e| Error::protocol(format!("No greeting from peer: {}", e)))?;
    if magic != PROTOCOL_MAGIC {
        return Err(Error::protocol(format!(
            "Peer speaks an incompatible protocol (0x{:08x})",
            magic
        )));
    }
    debug!("Peer speaks protocol version {}", PROTOCOL_VERSION);
    Ok(())
}

/// Trade requested modes with the peer and settle on this side's mode
///
/// Sent once, right after the greeting. A broken exchange or an
/// incompatible pair of requests is a protocol error.
pub fn agree_mode<R, W>(reader: &mut R, writer: &mut W, requested: SyncMode) -> Result<SyncMode>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let peer = write_varint(writer, requested.code())
        .and_then(|()| writer.flush().map_err(Error::from))
        .and_then(|()| read_varint(reader))
        .map_err(|e| Error::protocol(format!("Mode exchange failed: {}", e)))?;
    let mode = requested.agree(SyncMode::from_code(peer)?)?;
    debug!("Running in {} mode", mode);
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use psync_types::ErrorKind;
    use rstest::rstest;

    #[test]
    fn test_greeting_bytes() {
        let mut sent = Vec::new();
        greet(&mut &b"pSp\x03"[..], &mut sent).unwrap();
        assert_eq!(sent, b"pSp\x03");
        assert_eq!(PROTOCOL_VERSION, 3);
    }

    #[test]
    fn test_serving_side_mirrors_forced_mode() {
        let mut sent = Vec::new();
        let mode = agree_mode(&mut &b"\x81\x01"[..], &mut sent, SyncMode::Sync).unwrap();
        assert_eq!(mode, SyncMode::Get);
        assert_eq!(sent, [0x80]);
    }

    #[rstest]
    #[case::same_direction(&[0x81, 0x01][..])]
    #[case::unknown_mode(&[0x81, 0x09][..])]
    #[case::hung_up(&[][..])]
    fn test_bad_mode(#[case] peer: &[u8]) {
        let error = agree_mode(&mut &peer[..], &mut Vec::new(), SyncMode::Put).unwrap_err();
        assert_eq!(error.code(), -25);
    }

    #[rstest]
    #[case::older_version(&b"pSp\x02"[..])]
    #[case::file_magic(&b"pSf\x01"[..])]
    #[case::silent_peer(&b""[..])]
    #[case::short_greeting(&b"pS"[..])]
    fn test_bad_greeting(#[case] peer: &[u8]) {
        let error = greet(&mut &peer[..], &mut Vec::new()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
        assert_eq!(error.code(), -25);
    }
}
