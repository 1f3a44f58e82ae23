//! Terminal rendering of status lines and run reports

use console::style;
use psync_protocol::NegotiationReport;
use psync_types::{CounterTag, StatusLine, StatusSink};
use std::io::Write;
use std::sync::Mutex;

/// Which peer a rendered line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This process
    Local,
    /// The process at the other end of the stream
    Remote,
}

impl Origin {
    fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Sink that renders status lines for a person watching the run
#[derive(Debug)]
pub struct ConsoleSink {
    origin: Origin,
    quiet: bool,
}

impl ConsoleSink {
    /// Create a sink for lines of the given origin
    pub fn new(origin: Origin, quiet: bool) -> Self {
        Self { origin, quiet }
    }

    /// Text shown for a status line, if it is shown at all
    pub fn render(&self, line: &StatusLine) -> Option<String> {
        let side = style(self.origin.label()).dim();
        match line {
            StatusLine::Begin(name) => Some(format!(
                "{} {} {}",
                style("⟲").blue().bold(),
                side,
                style(name).cyan()
            )),
            StatusLine::End => None,
            StatusLine::Code(code) if *code > 0 => Some(format!(
                "  {} {} {}",
                style("…").yellow(),
                side,
                describe_code(*code)
            )),
            StatusLine::Code(code) => Some(format!(
                "  {} {} {} ({})",
                style("✗").red().bold(),
                side,
                describe_code(*code),
                code
            )),
            StatusLine::Message(message) => {
                Some(format!("  {} {} {}", style("!").yellow(), side, message))
            }
            StatusLine::Counter { .. } if self.quiet => None,
            StatusLine::Counter { tag, value } => Some(format!(
                "  {} {} {}",
                side,
                counter_label(*tag),
                style(value).green()
            )),
        }
    }
}

impl StatusSink for ConsoleSink {
    fn emit(&self, line: &StatusLine) {
        if let Some(text) = self.render(line) {
            println!("{}", text);
        }
    }
}

/// Sink that writes raw status lines, one per line
///
/// Used by the serving side, whose standard error is read by the peer.
#[derive(Debug)]
pub struct RawSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> RawSink<W> {
    /// Write lines to `out`
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> StatusSink for RawSink<W> {
    fn emit(&self, line: &StatusLine) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line).and_then(|()| out.flush());
        }
    }
}

fn counter_label(tag: CounterTag) -> &'static str {
    match tag {
        CounterTag::Scanned => "scanned",
        CounterTag::Uploaded => "uploaded",
        CounterTag::Downloaded => "downloaded",
        CounterTag::Removed => "removed",
        CounterTag::Copied => "copied",
    }
}

/// Short description of a status code
pub fn describe_code(code: i32) -> &'static str {
    match code {
        1 => "directory busy here",
        2 => "directory busy or failed on the peer",
        -2 => "unsupported file",
        -3 => "permission denied",
        -4 => "cannot create file",
        -5 => "cannot open file",
        -6 => "cannot write file",
        -7 => "cannot read file",
        -8 => "cannot link file",
        -9 => "cannot remove file",
        -10 => "cannot move file",
        -11 => "cannot set file attributes",
        -12 => "cannot stat file",
        -13 => "sending file list failed",
        -14 => "receiving file list failed",
        -15 => "sending file content failed",
        -16 => "receiving file content failed",
        -17 => "cannot create sync state",
        -18 => "cannot open sync state",
        -19 => "cannot write sync state",
        -20 => "cannot read sync state",
        -21 => "cannot remove sync state",
        -22 => "out of resources",
        -23 => "system failure",
        -24 => "interrupted",
        -25 => "protocol error",
        -27 => "configuration error",
        _ => "failed",
    }
}

/// Print the per-directory summary of a finished run
pub fn print_report(report: &NegotiationReport) {
    println!();
    println!("{}", style("Sync Summary:").bold().underlined());
    if report.directories.is_empty() {
        println!("  No directory is shared with the peer");
        return;
    }
    for directory in &report.directories {
        match &directory.result {
            Ok(sync) => {
                let s = &sync.summary;
                println!(
                    "  {} {}: {} deleted, {} added, {} modified / {} uploaded",
                    style("✓").green(),
                    style(&directory.name).cyan(),
                    s.deleted,
                    s.added,
                    s.modified,
                    s.uploaded
                );
                if sync.backups > 0 {
                    println!(
                        "      {} backups in {}",
                        style(sync.backups).yellow(),
                        sync.snapshot.display()
                    );
                }
            }
            Err(e) => println!(
                "  {} {}: {}",
                if e.code() > 0 {
                    style("…").yellow()
                } else {
                    style("✗").red()
                },
                style(&directory.name).cyan(),
                e
            ),
        }
    }
}
