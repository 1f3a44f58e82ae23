//! Result type alias for psync operations

use crate::Error;

/// Result type alias for psync operations
pub type Result<T> = std::result::Result<T, Error>;
