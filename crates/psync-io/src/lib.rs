//! Wire codec and stream I/O for psync
//!
//! This crate is the byte-level foundation shared by the sync session and
//! the negotiation protocol:
//!
//! - **Integer codec**: self-describing signed integers, length-prefixed blobs
//!   and four-byte identifiers
//! - **Poll-gated streams**: [`WireReader`] and [`WireWriter`] wait a bounded
//!   time for readiness before every transfer, so a silent peer is detected
//!   instead of hanging the run
//! - **Duplex**: both halves of the peer stream, usable from two threads
//!
//! # Examples
//!
//! ```rust
//! use psync_io::{read_varint, write_varint};
//! use std::io::Cursor;
//!
//! let mut buf = Vec::new();
//! write_varint(&mut buf, -300).unwrap();
//! assert_eq!(read_varint(&mut Cursor::new(buf)).unwrap(), -300);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
mod poll;
pub mod reader;
pub mod stream;
pub mod writer;

pub use codec::{
    encode_varint, read_blob, read_len, read_magic, read_varint, write_blob, write_len,
    write_magic, write_varint, MAX_VARINT_BYTES,
};
pub use reader::WireReader;
pub use stream::{Duplex, WireDuplex};
pub use writer::WireWriter;
