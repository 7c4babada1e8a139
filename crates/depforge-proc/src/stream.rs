// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-stream output policy: disposition, level, filtering, line routing.

use std::collections::BTreeMap;
use std::fmt;

use depforge_lines::{Encoding, LineBuffer};

/// Importance assigned to a produced output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Routine chatter, hidden unless the orchestrator runs verbose.
    Trace,
    /// Commands and notable progress.
    Debug,
    /// User-facing information.
    Info,
    /// Suspicious but non-fatal output.
    Warn,
    /// Failures.
    Error,
}

impl Level {
    /// Whether the active `tracing` subscriber would record this level.
    pub(crate) fn enabled(self) -> bool {
        match self {
            Level::Trace => tracing::enabled!(target: "depforge::proc", tracing::Level::TRACE),
            Level::Debug => tracing::enabled!(target: "depforge::proc", tracing::Level::DEBUG),
            Level::Info => tracing::enabled!(target: "depforge::proc", tracing::Level::INFO),
            Level::Warn => tracing::enabled!(target: "depforge::proc", tracing::Level::WARN),
            Level::Error => tracing::enabled!(target: "depforge::proc", tracing::Level::ERROR),
        }
    }
}

/// Why a line is being logged: the engine's own command chatter, or child
/// output on one of the two standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Engine lifecycle messages.
    Command,
    /// Child standard output.
    Stdout,
    /// Child standard error.
    Stderr,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::Command => "cmd",
            Reason::Stdout => "stdout",
            Reason::Stderr => "stderr",
        })
    }
}

/// Policy for a child output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Split into lines, filter, and forward each line to the log.
    #[default]
    Forward,
    /// Split into lines, filter, and keep the text in memory for
    /// `stdout_string()` / `stderr_string()`.
    Capture,
    /// Redirect to the null device.
    Discard,
    /// Leave the stream connected to the orchestrator's own console.
    Inherit,
}

impl Disposition {
    /// Whether this disposition needs a pipe and a reader.
    pub(crate) fn piped(self) -> bool {
        matches!(self, Disposition::Forward | Disposition::Capture)
    }
}

/// Mutable view of one output line handed to a filter callback.
///
/// The borrowed text is only valid for the duration of the call; a filter
/// may reclassify the line's [`Level`] or [`Reason`], or set `suppress` to
/// drop it entirely.
#[derive(Debug)]
pub struct LineRecord<'a> {
    /// The line text, without its terminator.
    pub line: &'a str,
    /// Classification of the line.
    pub reason: Reason,
    /// Level the line will be logged or retained at.
    pub level: Level,
    /// Set to `true` to drop the line.
    pub suppress: bool,
}

/// Caller-supplied per-line filter.
pub type LineFilter = Box<dyn FnMut(&mut LineRecord<'_>) + Send>;

/// Emit one line through `tracing` at a dynamic level.
pub(crate) fn emit_line(level: Level, reason: Reason, line: &str) {
    match level {
        Level::Trace => tracing::trace!(target: "depforge::proc", reason = %reason, "{line}"),
        Level::Debug => tracing::debug!(target: "depforge::proc", reason = %reason, "{line}"),
        Level::Info => tracing::info!(target: "depforge::proc", reason = %reason, "{line}"),
        Level::Warn => tracing::warn!(target: "depforge::proc", reason = %reason, "{line}"),
        Level::Error => tracing::error!(target: "depforge::proc", reason = %reason, "{line}"),
    }
}

// ---------------------------------------------------------------------------
// StreamState
// ---------------------------------------------------------------------------

/// Live state of one supervised stream: its configured policy, the
/// incremental line splitter, and the captured text if buffering.
pub(crate) struct StreamState {
    pub(crate) disposition: Disposition,
    pub(crate) level: Level,
    pub(crate) encoding: Encoding,
    pub(crate) reason: Reason,
    pub(crate) filter: Option<LineFilter>,
    pub(crate) buffer: LineBuffer,
    pub(crate) captured: String,
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("disposition", &self.disposition)
            .field("level", &self.level)
            .field("encoding", &self.encoding)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl StreamState {
    pub(crate) fn new(reason: Reason, level: Level) -> Self {
        Self {
            disposition: Disposition::default(),
            level,
            encoding: Encoding::default(),
            reason,
            filter: None,
            buffer: LineBuffer::default(),
            captured: String::new(),
        }
    }

    /// Discard any state left over from a previous run.
    pub(crate) fn reset(&mut self) {
        self.buffer = LineBuffer::new(self.encoding);
        self.captured.clear();
    }

    /// Feed newly read bytes (or, with `finished`, flush the pending tail)
    /// through the line splitter and route each line per the disposition.
    ///
    /// `quiet` suppresses live forwarding; retained per-level lines in
    /// `logs` still accumulate so a post-exit dump can replay them.
    pub(crate) fn feed(
        &mut self,
        bytes: &[u8],
        finished: bool,
        quiet: bool,
        logs: &mut BTreeMap<Level, Vec<String>>,
    ) {
        let StreamState {
            disposition,
            level,
            reason,
            filter,
            buffer,
            captured,
            ..
        } = self;

        match disposition {
            Disposition::Discard | Disposition::Inherit => {}
            Disposition::Forward => {
                buffer.add(bytes);
                buffer.next_lines(finished, |line| {
                    let mut record = LineRecord {
                        line: &line,
                        reason: *reason,
                        level: *level,
                        suppress: false,
                    };
                    if let Some(f) = filter.as_mut() {
                        f(&mut record);
                    }
                    let (lv, rs, suppress) = (record.level, record.reason, record.suppress);
                    if suppress {
                        return;
                    }
                    if !quiet {
                        emit_line(lv, rs, &line);
                    }
                    logs.entry(lv).or_default().push(line);
                });
            }
            Disposition::Capture => {
                buffer.add(bytes);
                buffer.next_lines(finished, |line| {
                    let mut record = LineRecord {
                        line: &line,
                        reason: *reason,
                        level: *level,
                        suppress: false,
                    };
                    if let Some(f) = filter.as_mut() {
                        f(&mut record);
                    }
                    if record.suppress {
                        return;
                    }
                    captured.push_str(&line);
                    captured.push('\n');
                });
            }
        }
    }
}
