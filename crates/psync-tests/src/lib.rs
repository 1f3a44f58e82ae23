//! psync integration testing support
//!
//! Tests in this crate run two complete peers in threads of one process,
//! connected by a socket pair, and inspect both trees afterwards.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Peer trees and helpers shared by the integration tests
pub mod test_utils;
