//! Core traits for psync operations
//!
//! These are the seams between the sync engine and its front ends: where
//! status lines go, and how a run learns that it should stop.

use crate::{Error, Result, StatusLine};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Receiver of status stream lines
///
/// Sessions emit from both the coordinating thread and the transfer helper
/// thread, so sinks must be shareable.
pub trait StatusSink: Send + Sync {
    /// Deliver one status line
    fn emit(&self, line: &StatusLine);
}

impl<T: StatusSink + ?Sized> StatusSink for &T {
    fn emit(&self, line: &StatusLine) {
        (**self).emit(line);
    }
}

/// Sink that discards every line
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn emit(&self, _line: &StatusLine) {}
}

/// Sink that keeps every line in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<StatusLine>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines received so far
    pub fn lines(&self) -> Vec<StatusLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl StatusSink for MemorySink {
    fn emit(&self, line: &StatusLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
    }
}

/// Cooperative cancellation check
pub trait CancelCheck {
    /// Fail with [`Error::Cancelled`] once a stop was requested
    fn check(&self) -> Result<()>;
}

impl CancelCheck for CancellationToken {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CounterTag;

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        sink.emit(&StatusLine::Begin("a".into()));
        (&sink).emit(&StatusLine::Counter {
            tag: CounterTag::Scanned,
            value: 1,
        });
        sink.emit(&StatusLine::End);
        assert_eq!(sink.lines().len(), 3);
        assert_eq!(sink.lines()[2], StatusLine::End);
    }

    #[test]
    fn test_cancel_check() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
