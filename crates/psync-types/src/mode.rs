//! Direction of a sync run

use crate::{Error, Result};
use std::fmt;

/// Which side's tree decides the outcome of every name
///
/// Each peer states its mode in its own terms: the side that pushes its
/// tree runs [`SyncMode::Put`], the side receiving it [`SyncMode::Get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMode {
    /// Two-way merge, newer revision wins
    #[default]
    Sync,
    /// The local tree wins, entries only on the peer are deleted there
    Put,
    /// The peer's tree wins, entries only on this side are deleted here
    Get,
}

impl SyncMode {
    /// The same run seen from the peer
    pub const fn mirrored(self) -> Self {
        match self {
            Self::Sync => Self::Sync,
            Self::Put => Self::Get,
            Self::Get => Self::Put,
        }
    }

    /// Value sent on the wire
    pub const fn code(self) -> i64 {
        match self {
            Self::Sync => 0,
            Self::Put => 1,
            Self::Get => 2,
        }
    }

    /// Decode a wire value
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Sync),
            1 => Ok(Self::Put),
            2 => Ok(Self::Get),
            other => Err(Error::protocol(format!("Unknown sync mode {}", other))),
        }
    }

    /// Mode this side runs once both peers stated theirs
    ///
    /// A side asking for a plain sync follows a forced direction requested
    /// by the peer. Two sides forcing the same direction cannot both win.
    pub fn agree(self, peer: Self) -> Result<Self> {
        match (self, peer) {
            (mode, Self::Sync) => Ok(mode),
            (Self::Sync, forced) => Ok(forced.mirrored()),
            (mode, forced) if mode == forced.mirrored() => Ok(mode),
            (mode, _) => Err(Error::protocol(format!(
                "Both peers requested a forced {}",
                mode
            ))),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Put => "put",
            Self::Get => "get",
        })
    }
}
