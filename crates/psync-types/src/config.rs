//! Transport tuning types
//!
//! Validated newtypes shared by the wire layer and the transfer stage.

use std::time::Duration;

/// Transfer chunk size with validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferSize(usize);

impl BufferSize {
    /// Minimum buffer size (512B)
    pub const MIN: usize = 512;
    /// Maximum buffer size (16MB)
    pub const MAX: usize = 16 * 1024 * 1024;
    /// Default buffer size (16KB)
    pub const DEFAULT: usize = 16 * 1024;

    /// Create a new buffer size with validation
    pub fn new(size: usize) -> Result<Self, String> {
        if size < Self::MIN {
            Err(format!("Buffer size {} is below minimum {}", size, Self::MIN))
        } else if size > Self::MAX {
            Err(format!("Buffer size {} exceeds maximum {}", size, Self::MAX))
        } else if !size.is_power_of_two() {
            Err(format!("Buffer size {} must be a power of two", size))
        } else {
            Ok(Self(size))
        }
    }

    /// Get the buffer size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Timeout configuration for the peer stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeoutConfig {
    /// Longest wait for the stream to become readable or writable
    pub poll_timeout: Duration,
}

impl TimeoutConfig {
    /// Default poll timeout (100s)
    pub const DEFAULT_POLL: Duration = Duration::from_secs(100);

    /// Create a timeout configuration
    pub fn new(poll_timeout: Duration) -> Result<Self, String> {
        if poll_timeout.is_zero() {
            return Err("Poll timeout must be greater than zero".to_string());
        }
        Ok(Self { poll_timeout })
    }

    /// Poll timeout in whole milliseconds, saturated to `i32::MAX`
    pub fn poll_millis(&self) -> i32 {
        i32::try_from(self.poll_timeout.as_millis()).unwrap_or(i32::MAX)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Self::DEFAULT_POLL,
        }
    }
}
