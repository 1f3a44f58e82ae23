//! Status stream lines
//!
//! A sync run reports to its front end through single-line records:
//! `[name` opens a directory, `]` closes it, `!...` carries an error code
//! or a message and `<tag><+value>` reports a progress counter.

use std::fmt;
use std::str::FromStr;

/// Progress counter reported by a session stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CounterTag {
    /// Entries scanned in the local tree
    Scanned,
    /// Bytes staged for upload
    Uploaded,
    /// Bytes received from the peer
    Downloaded,
    /// Local entries moved to backups or removed
    Removed,
    /// Downloaded entries moved into place
    Copied,
}

impl CounterTag {
    /// Single-character tag used on the wire
    pub const fn as_char(self) -> char {
        match self {
            Self::Scanned => 'S',
            Self::Uploaded => 'U',
            Self::Downloaded => 'D',
            Self::Removed => 'R',
            Self::Copied => 'C',
        }
    }

    /// Parse a single-character tag
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'S' => Some(Self::Scanned),
            'U' => Some(Self::Uploaded),
            'D' => Some(Self::Downloaded),
            'R' => Some(Self::Removed),
            'C' => Some(Self::Copied),
            _ => None,
        }
    }
}

/// One line of the status stream
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusLine {
    /// Start of a directory
    Begin(String),
    /// End of the current directory
    End,
    /// Status code of a failed or skipped directory
    Code(i32),
    /// Free-form message
    Message(String),
    /// Progress counter
    Counter {
        /// Counter kind
        tag: CounterTag,
        /// Running total
        value: i64,
    },
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin(name) => write!(f, "[{}", name),
            Self::End => f.write_str("]"),
            Self::Code(code) => write!(f, "!{:+}", code),
            Self::Message(message) => write!(f, "!{}", message),
            Self::Counter { tag, value } => write!(f, "{}{:+}", tag.as_char(), value),
        }
    }
}

/// Error returned when a line is not a status line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a status line: {0:?}")]
pub struct ParseStatusError(String);

impl FromStr for StatusLine {
    type Err = ParseStatusError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut chars = line.chars();
        let first = chars.next().ok_or_else(|| ParseStatusError(line.to_string()))?;
        let rest = chars.as_str();
        match first {
            '[' => Ok(Self::Begin(rest.to_string())),
            ']' if rest.is_empty() => Ok(Self::End),
            '!' => Ok(rest
                .parse::<i32>()
                .map_or_else(|_| Self::Message(rest.to_string()), Self::Code)),
            c => match (CounterTag::from_char(c), rest.parse::<i64>()) {
                (Some(tag), Ok(value)) => Ok(Self::Counter { tag, value }),
                _ => Err(ParseStatusError(line.to_string())),
            },
        }
    }
}
