//! Duplex channel to a peer

use crate::{WireReader, WireWriter};
use psync_types::{BufferSize, TimeoutConfig};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

/// Both directions of the byte stream to a peer
///
/// The two halves are independent so one thread can send while another
/// receives. Callers flush `writer` at the end of every message the peer
/// waits on.
#[derive(Debug)]
pub struct Duplex<R, W> {
    /// Inbound half
    pub reader: R,
    /// Outbound half
    pub writer: W,
}

/// Buffered, poll-gated duplex over raw descriptors
pub type WireDuplex<R, W> = Duplex<BufReader<WireReader<R>>, BufWriter<WireWriter<W>>>;

impl<R: Read, W: Write> Duplex<R, W> {
    /// Pair an inbound and an outbound stream
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Borrow both halves at once
    pub fn split(&mut self) -> (&mut R, &mut W) {
        (&mut self.reader, &mut self.writer)
    }
}

impl<R: Read + AsFd, W: Write + AsFd> WireDuplex<R, W> {
    /// Wrap raw descriptors with poll-gated, buffered halves
    pub fn wire(reader: R, writer: W, timeout: TimeoutConfig, buffer: BufferSize) -> Self {
        Duplex::new(
            BufReader::with_capacity(buffer.get(), WireReader::new(reader, timeout)),
            BufWriter::with_capacity(buffer.get(), WireWriter::new(writer, timeout)),
        )
    }
}

impl WireDuplex<File, File> {
    /// Wrap duplicates of two descriptors
    ///
    /// Handles such as [`io::Stdin`] keep a private buffer that would pull
    /// bytes off the descriptor behind the poll gate. Reading through a
    /// duplicate leaves every byte visible to `poll`.
    pub fn from_fds(
        reader: impl AsFd,
        writer: impl AsFd,
        timeout: TimeoutConfig,
        buffer: BufferSize,
    ) -> io::Result<Self> {
        let reader = File::from(reader.as_fd().try_clone_to_owned()?);
        let writer = File::from(writer.as_fd().try_clone_to_owned()?);
        Ok(Self::wire(reader, writer, timeout, buffer))
    }

    /// Standard input and output of this process
    pub fn stdio(timeout: TimeoutConfig, buffer: BufferSize) -> io::Result<Self> {
        Self::from_fds(io::stdin(), io::stdout(), timeout, buffer)
    }
}

impl WireDuplex<UnixStream, UnixStream> {
    /// Use a connected socket for both directions
    pub fn from_socket(
        socket: UnixStream,
        timeout: TimeoutConfig,
        buffer: BufferSize,
    ) -> io::Result<Self> {
        let writer = socket.try_clone()?;
        Ok(Self::wire(socket, writer, timeout, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_varint, write_varint};

    #[test]
    fn test_socket_pair_exchange() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = Duplex::from_socket(a, TimeoutConfig::default(), BufferSize::default()).unwrap();
        let mut right = Duplex::from_socket(b, TimeoutConfig::default(), BufferSize::default()).unwrap();

        write_varint(&mut left.writer, 1234).unwrap();
        left.writer.flush().unwrap();
        write_varint(&mut right.writer, -5).unwrap();
        right.writer.flush().unwrap();

        let (reader, _) = right.split();
        assert_eq!(read_varint(reader).unwrap(), 1234);
        assert_eq!(read_varint(&mut left.reader).unwrap(), -5);
    }

    #[test]
    fn test_descriptor_duplex_reads_past_small_buffer() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let timeout = TimeoutConfig::new(std::time::Duration::from_secs(2)).unwrap();
        let buffer = BufferSize::new(4096).unwrap();
        let mut duplex = WireDuplex::from_fds(&a, &a, timeout, buffer).unwrap();
        drop(a);

        let sent: Vec<u8> = (0..6000u32).map(|i| (i % 251) as u8).collect();
        b.write_all(&sent).unwrap();

        let mut head = [0u8; 100];
        duplex.reader.read_exact(&mut head).unwrap();
        let mut tail = vec![0u8; 5900];
        duplex.reader.read_exact(&mut tail).unwrap();
        assert_eq!(&head[..], &sent[..100]);
        assert_eq!(tail, &sent[100..]);

        duplex.writer.write_all(b"ok").unwrap();
        duplex.writer.flush().unwrap();
        let mut reply = [0u8; 2];
        b.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ok");
    }
}
