//! Error types and handling for psync
//!
//! Every failure a sync run can hit is classified into an [`ErrorKind`] and
//! carries a stable numeric status code. The codes are what the status stream
//! reports (`!-7`) and what the process exit status is derived from.

use std::fmt;
use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - the directory is skipped for this round
    Low,
    /// Medium severity - the directory sync failed
    Medium,
    /// High severity - the stream to the peer can no longer be trusted
    High,
    /// Critical severity - the run cannot continue at all
    Critical,
}

/// Filesystem operation that failed on a synchronized tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileOperation {
    /// Creating a file, directory or symlink
    Make,
    /// Opening a file or directory
    Open,
    /// Writing file content
    Write,
    /// Reading file content or a symlink target
    Read,
    /// Hard-linking a file into the staging area
    Link,
    /// Unlinking or removing a directory entry
    Remove,
    /// Renaming a directory entry
    Move,
    /// Changing permissions or timestamps
    StatWrite,
    /// Reading entry metadata
    StatRead,
}

impl FileOperation {
    fn code(self) -> i32 {
        match self {
            Self::Make => -4,
            Self::Open => -5,
            Self::Write => -6,
            Self::Read => -7,
            Self::Link => -8,
            Self::Remove => -9,
            Self::Move => -10,
            Self::StatWrite => -11,
            Self::StatRead => -12,
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Make => "create",
            Self::Open => "open",
            Self::Write => "write",
            Self::Read => "read",
            Self::Link => "link",
            Self::Remove => "remove",
            Self::Move => "move",
            Self::StatWrite => "update metadata of",
            Self::StatRead => "read metadata of",
        };
        f.write_str(name)
    }
}

/// Operation on the session's own state files under `.psync`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetadataOperation {
    /// Creating a state file or the lock folder
    Make,
    /// Opening a state file or folder
    Open,
    /// Writing or renaming a state file
    Write,
    /// Reading a state file or folder entry
    Read,
    /// Removing an expired backup
    Remove,
}

impl MetadataOperation {
    fn code(self) -> i32 {
        match self {
            Self::Make => -17,
            Self::Open => -18,
            Self::Write => -19,
            Self::Read => -20,
            Self::Remove => -21,
        }
    }
}

impl fmt::Display for MetadataOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Make => "create",
            Self::Open => "open",
            Self::Write => "write",
            Self::Read => "read",
            Self::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Direction and payload of a failed wire transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferStage {
    /// Sending a file-state or name list
    StateUpload,
    /// Receiving a file-state or name list
    StateDownload,
    /// Sending file content
    FileUpload,
    /// Receiving file content
    FileDownload,
}

impl TransferStage {
    fn code(self) -> i32 {
        match self {
            Self::StateUpload => -13,
            Self::StateDownload => -14,
            Self::FileUpload => -15,
            Self::FileDownload => -16,
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StateUpload => "state upload",
            Self::StateDownload => "state download",
            Self::FileUpload => "file upload",
            Self::FileDownload => "file download",
        };
        f.write_str(name)
    }
}

/// Which peer could not take part in a directory sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    /// This process
    Local,
    /// The peer on the other end of the stream
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Main error type for psync operations
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// Unattributed stream I/O failure
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Entry that is neither a regular file, a directory nor a symlink
    #[error("Unsupported file: {path}")]
    UnsupportedFile {
        /// Path relative to the synchronized tree
        path: PathBuf,
    },

    /// Entry lacks the access rights needed to synchronize it
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// Path of the entry
        path: PathBuf,
    },

    /// Filesystem operation on a synchronized tree failed
    #[error("Failed to {operation} '{path}': {message}")]
    File {
        /// Operation that failed
        operation: FileOperation,
        /// Path of the entry
        path: PathBuf,
        /// Underlying error message
        message: String,
    },

    /// Operation on the session's own state files failed
    #[error("Failed to {operation} sync state '{path}': {message}")]
    Metadata {
        /// Operation that failed
        operation: MetadataOperation,
        /// Path of the state file or folder
        path: PathBuf,
        /// Underlying error message
        message: String,
    },

    /// Exchange with the peer failed mid-stream
    #[error("{stage} failed: {message}")]
    Transfer {
        /// Stage of the exchange
        stage: TransferStage,
        /// Underlying error message
        message: String,
    },

    /// Peer sent something that does not follow the wire format
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the violation
        message: String,
    },

    /// Allocation or size limit exceeded
    #[error("Resource error: {message}")]
    Resource {
        /// Description of the exhausted resource
        message: String,
    },

    /// Thread, process or signal handling failure
    #[error("System error: {message}")]
    System {
        /// Description of the failure
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// A directory lock is already held
    #[error("{side} directory is not ready")]
    NotReady {
        /// Side that holds the lock
        side: Side,
    },

    /// The peer abandoned the directory and reported its status code
    #[error("Remote side failed with status {code}")]
    RemoteFailed {
        /// Status code reported by the peer
        code: i32,
    },

    /// Failure while data was in flight, leaving the peer stream out of step
    #[error("{source} (peer stream out of step)")]
    Desynchronized {
        /// The failure that interrupted the exchange
        source: Box<Error>,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong type, permission or file operation failure in a tree
    Filesystem,
    /// Failure on the session's own state files
    Metadata,
    /// Stream read or write failure
    Wire,
    /// Malformed data from the peer
    Protocol,
    /// Allocation failure
    Resource,
    /// Environment failure
    System,
    /// Configuration errors
    Config,
    /// Cooperative stop observed
    Interrupted,
    /// Lock held on either side
    NotReady,
    /// Peer-side failure reported over the stream
    Remote,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFile { .. } | Self::PermissionDenied { .. } | Self::File { .. } => {
                ErrorKind::Filesystem
            }
            Self::Metadata { .. } => ErrorKind::Metadata,
            Self::Io { .. } | Self::Transfer { .. } => ErrorKind::Wire,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::System { .. } => ErrorKind::System,
            Self::Config { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Interrupted,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::RemoteFailed { .. } => ErrorKind::Remote,
            Self::Desynchronized { source } => source.kind(),
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotReady { .. } | Self::RemoteFailed { .. } => ErrorSeverity::Low,
            Self::UnsupportedFile { .. }
            | Self::PermissionDenied { .. }
            | Self::File { .. }
            | Self::Metadata { .. } => ErrorSeverity::Medium,
            Self::Io { .. } | Self::Transfer { .. } | Self::Protocol { .. } => ErrorSeverity::High,
            Self::Cancelled | Self::Desynchronized { .. } => ErrorSeverity::High,
            Self::Resource { .. } | Self::System { .. } | Self::Config { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// Status code reported on the status stream
    ///
    /// Negative values are failures, `1` and `2` mean the local or remote
    /// directory was not ready.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnsupportedFile { .. } => -2,
            Self::PermissionDenied { .. } => -3,
            Self::File { operation, .. } => operation.code(),
            Self::Io { .. } => TransferStage::StateDownload.code(),
            Self::Transfer { stage, .. } => stage.code(),
            Self::Metadata { operation, .. } => operation.code(),
            Self::Resource { .. } => -22,
            Self::System { .. } => -23,
            Self::Cancelled => -24,
            Self::Protocol { .. } => -25,
            Self::Config { .. } => -27,
            Self::NotReady { side: Side::Local } => 1,
            Self::NotReady { side: Side::Remote } => 2,
            Self::RemoteFailed { .. } => 2,
            Self::Desynchronized { source } => source.code(),
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        let code = self.code();
        if code < 0 {
            (-code).min(255)
        } else {
            0
        }
    }

    /// Check if the byte stream to the peer lost its known state
    ///
    /// Once a stream-breaking error happens the remaining directories
    /// cannot be negotiated.
    pub fn breaks_stream(&self) -> bool {
        matches!(self, Self::Desynchronized { .. })
            || matches!(
                self.kind(),
                ErrorKind::Wire
                    | ErrorKind::Protocol
                    | ErrorKind::Interrupted
                    | ErrorKind::System
                    | ErrorKind::Resource
            )
    }

    /// Check if this error is recoverable
    ///
    /// A recoverable error only costs the current directory its sync round.
    pub fn is_recoverable(&self) -> bool {
        !self.breaks_stream() && self.kind() != ErrorKind::Config
    }

    /// Check if running again later may succeed without intervention
    pub fn should_retry(&self) -> bool {
        self.is_recoverable() && self.severity() <= ErrorSeverity::Low
    }

    /// Attribute an unattributed stream failure to a transfer stage
    pub fn during(self, stage: TransferStage) -> Self {
        match self {
            Self::Io { message } => Self::Transfer { stage, message },
            other => other,
        }
    }

    /// Mark a failure that happened while data was in flight
    ///
    /// Errors that already break the stream are returned unchanged.
    pub fn desynchronized(self) -> Self {
        if self.breaks_stream() {
            self
        } else {
            Self::Desynchronized {
                source: Box::new(self),
            }
        }
    }

    /// Create a new filesystem error
    pub fn file(
        operation: FileOperation,
        path: impl Into<PathBuf>,
        error: impl fmt::Display,
    ) -> Self {
        Self::File {
            operation,
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Create a new sync-state error
    pub fn metadata(
        operation: MetadataOperation,
        path: impl Into<PathBuf>,
        error: impl fmt::Display,
    ) -> Self {
        Self::Metadata {
            operation,
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new system error
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Create a new resource error
    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::InvalidData => Self::Protocol {
                message: error.to_string(),
            },
            std::io::ErrorKind::OutOfMemory => Self::Resource {
                message: error.to_string(),
            },
            _ => Self::Io {
                message: error.to_string(),
            },
        }
    }
}
