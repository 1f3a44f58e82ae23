//! Poll-gated stream writer

use crate::poll::{wait_ready, Direction};
use psync_types::TimeoutConfig;
use std::io::{self, Write};
use std::os::fd::AsFd;

/// Writer that waits a bounded time for buffer space before every write
#[derive(Debug)]
pub struct WireWriter<W> {
    inner: W,
    timeout: TimeoutConfig,
    bytes_written: u64,
}

impl<W: Write + AsFd> WireWriter<W> {
    /// Wrap a writable descriptor
    pub fn new(inner: W, timeout: TimeoutConfig) -> Self {
        Self {
            inner,
            timeout,
            bytes_written: 0,
        }
    }

    /// Get the number of bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Unwrap the underlying descriptor
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + AsFd> Write for WireWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        wait_ready(self.inner.as_fd(), Direction::Write, &self.timeout)?;
        loop {
            match self.inner.write(buf) {
                Ok(n) => {
                    self.bytes_written += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_writes_reach_peer() {
        let (tx, mut rx) = UnixStream::pair().unwrap();
        let mut writer = WireWriter::new(tx, TimeoutConfig::default());
        writer.write_all(b"payload").unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.bytes_written(), 7);

        let mut buf = [0u8; 7];
        rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn test_write_to_closed_peer_fails() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(rx);
        let mut writer = WireWriter::new(tx, TimeoutConfig::default());
        assert!(writer.write_all(&[0u8; 1024]).is_err());
    }
}
