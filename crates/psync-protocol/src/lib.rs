//! Peer negotiation for psync
//!
//! Two psync processes talk over one byte stream. This crate runs the
//! outer protocol around the per-directory sync sessions:
//!
//! - **Greeting**: both sides send a four-byte identifier with the
//!   protocol version and refuse to continue on a mismatch
//! - **Mode agreement**: a forced put on one side runs as a get on the
//!   other, and two sides forcing the same direction stop
//! - **Directory registry**: the locally configured directories, sent to
//!   the peer as a sorted name list
//! - **Negotiation**: every directory known to both sides is synchronized
//!   in name order, a directory that cannot be locked is skipped on both
//!   ends, and a broken stream ends the run
//!
//! # Examples
//!
//! ```rust,no_run
//! use psync_config::ConfigLoader;
//! use psync_protocol::{DirectoryRegistry, Negotiator};
//! use psync_types::{CancellationToken, NullSink};
//! use std::io::{stdin, stdout};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load_default()?;
//! let registry = DirectoryRegistry::from_config(&config)?;
//! let report = Negotiator::new(&registry, &NullSink, CancellationToken::new())
//!     .run(&mut stdin(), &mut stdout())?;
//! std::process::exit(report.exit_code());
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod negotiation;
pub mod protocol;
pub mod registry;

pub use negotiation::{DirectoryOutcome, NegotiationReport, Negotiator};
pub use protocol::{agree_mode, greet, PROTOCOL_MAGIC, PROTOCOL_VERSION};
pub use registry::{read_names, DirectoryEntry, DirectoryRegistry};
