//! Throttled progress counters

use psync_types::{CounterTag, StatusLine, StatusSink};
use std::time::{Duration, Instant};

/// Default minimum time between two lines of the same counter
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Running total of one session stage reported to a [`StatusSink`]
///
/// A line is emitted when the value changed and the interval has elapsed
/// since the previous line. [`Progress::finish`] reports the final value if
/// it was not reported yet.
pub struct Progress<'a> {
    sink: &'a dyn StatusSink,
    tag: CounterTag,
    interval: Duration,
    value: i64,
    reported: i64,
    last: Instant,
}

impl<'a> Progress<'a> {
    /// Start a counter at zero
    pub fn new(sink: &'a dyn StatusSink, tag: CounterTag, interval: Duration) -> Self {
        Self {
            sink,
            tag,
            interval,
            value: 0,
            reported: 0,
            last: Instant::now(),
        }
    }

    /// Add `delta` to the running total
    pub fn add(&mut self, delta: u64) {
        self.value = self.value.saturating_add(delta as i64);
        if self.value != self.reported && self.last.elapsed() >= self.interval {
            self.report();
        }
    }

    /// Current total
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Report the final value if it changed since the last line
    pub fn finish(mut self) -> i64 {
        if self.value != self.reported {
            self.report();
        }
        self.value
    }

    fn report(&mut self) {
        self.sink.emit(&StatusLine::Counter {
            tag: self.tag,
            value: self.value,
        });
        self.reported = self.value;
        self.last = Instant::now();
    }
}

impl std::fmt::Debug for Progress<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("tag", &self.tag)
            .field("value", &self.value)
            .field("reported", &self.reported)
            .finish_non_exhaustive()
    }
}
