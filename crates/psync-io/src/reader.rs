//! Poll-gated stream reader

use crate::poll::{wait_ready, Direction};
use psync_types::TimeoutConfig;
use std::io::{self, Read};
use std::os::fd::AsFd;

/// Reader that waits a bounded time for data before every read
///
/// A peer that stops sending is reported as [`io::ErrorKind::TimedOut`]
/// instead of blocking forever. Signal interruptions are retried.
#[derive(Debug)]
pub struct WireReader<R> {
    inner: R,
    timeout: TimeoutConfig,
    bytes_read: u64,
}

impl<R: Read + AsFd> WireReader<R> {
    /// Wrap a readable descriptor
    pub fn new(inner: R, timeout: TimeoutConfig) -> Self {
        Self {
            inner,
            timeout,
            bytes_read: 0,
        }
    }

    /// Get the number of bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Unwrap the underlying descriptor
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + AsFd> Read for WireReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        wait_ready(self.inner.as_fd(), Direction::Read, &self.timeout)?;
        loop {
            match self.inner.read(buf) {
                Ok(n) => {
                    self.bytes_read += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    #[test]
    fn test_reads_available_data() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(b"abc").unwrap();
        let mut reader = WireReader::new(rx, TimeoutConfig::default());
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(reader.bytes_read(), 3);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let timeout = TimeoutConfig::new(Duration::from_millis(20)).unwrap();
        let mut reader = WireReader::new(rx, timeout);
        let mut buf = [0u8; 1];
        let error = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_closed_peer_is_eof() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(tx);
        let mut reader = WireReader::new(rx, TimeoutConfig::default());
        let mut buf = [0u8; 4];
        let error = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
