//! Core type system and error handling for psync
//!
//! This crate provides the foundational types shared by every psync crate:
//!
//! - **Error handling**: classified errors with status codes and severities
//! - **Records**: [`FileRecord`] and its [`Flags`] byte
//! - **Merge-join**: the sorted two-sequence walk behind reconciliation
//! - **Sync modes**: [`SyncMode`] and how two peers agree on one
//! - **Status stream**: [`StatusLine`] and the [`StatusSink`] seam
//! - **Cancellation**: [`CancelCheck`] over a shared [`CancellationToken`]
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use psync_types::{merge_join, FileRecord, Sets};
//!
//! let local = [("a.txt", FileRecord::default())];
//! let remote = [("a.txt", FileRecord::tombstone(7)), ("b.txt", FileRecord::default())];
//! let both = merge_join(local, remote)
//!     .filter(|(_, class)| matches!(class, Sets::Both(..)))
//!     .count();
//! assert_eq!(both, 1);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod mode;
pub mod result;
pub mod sets;
pub mod status;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{BufferSize, TimeoutConfig};
pub use error::{
    Error, ErrorKind, ErrorSeverity, FileOperation, MetadataOperation, Side, TransferStage,
};
pub use mode::SyncMode;
pub use result::Result;
pub use sets::{merge_join, MergeJoin, Sets};
pub use status::{CounterTag, ParseStatusError, StatusLine};
pub use tokio_util::sync::CancellationToken;
pub use traits::*;
pub use types::*;
