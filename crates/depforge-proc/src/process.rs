// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process lifecycle: spawn, stream wiring, wait loop, teardown, exit
//! evaluation.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, trace, warn};

use depforge_lines::{Encoding, LineBuffer};

use crate::args::{ArgOpts, ToArg, shell_quote};
use crate::error::ProcessError;
use crate::interrupt::InterruptToken;
use crate::pipe::PipeReader;
use crate::stream::{Disposition, Level, LineRecord, Reason, StreamState, emit_line};

const TARGET: &str = "depforge::proc";

/// Poll window for post-exit pipe draining. Data can still be in flight
/// between the child's last write and this end of the pipe when the exit
/// signal fires.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Default grace period between the graceful stop request and the forced
/// kill of the process group.
const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Exit code recorded when the real one cannot be obtained, e.g. for a
/// child ended by a signal.
const CODE_UNAVAILABLE: i32 = 0xffff;

// ---------------------------------------------------------------------------
// ProcessState
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Configured but not yet run.
    NotStarted,
    /// The child is alive and being supervised.
    Running,
    /// The child exited on its own.
    Completed,
    /// The child was stopped because an interrupt was requested.
    Interrupted,
    /// The child outlived its deadline and was terminated.
    TimedOut,
    /// The run was finalized; no OS resources remain.
    Joined,
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

/// One external command (or one shell pipeline), configured through a
/// fluent builder and supervised for its whole lifetime by
/// [`run`](Process::run).
///
/// The engine never performs a blocking read: both output streams are
/// pumped by [`PipeReader`]s and multiplexed together with the exit signal,
/// the [`InterruptToken`] and the optional deadline in a single wait loop.
/// Every exit path — success, failure, timeout, interrupt — releases the
/// child handle and its process group.
pub struct Process {
    name: Option<String>,
    bin: Option<PathBuf>,
    raw: Option<String>,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    stdin_bytes: Option<Vec<u8>>,
    allow_failure: bool,
    terminate_on_interrupt: bool,
    ignore_output_on_success: bool,
    success_codes: BTreeSet<i32>,
    error_log: Option<PathBuf>,
    deadline: Option<Duration>,
    grace: Duration,
    stdout: StreamState,
    stderr: StreamState,
    logs: BTreeMap<Level, Vec<String>>,
    interrupt: InterruptToken,
    state: ProcessState,
    code: i32,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("bin", &self.bin)
            .field("raw", &self.raw)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("state", &self.state)
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Process {
    /// Create an unconfigured process. Stdout defaults to
    /// [`Disposition::Forward`] at [`Level::Trace`], stderr to
    /// [`Disposition::Forward`] at [`Level::Error`]; exit code 0 is the
    /// only success code.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            bin: None,
            raw: None,
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            stdin_bytes: None,
            allow_failure: false,
            terminate_on_interrupt: false,
            ignore_output_on_success: false,
            success_codes: BTreeSet::from([0]),
            error_log: None,
            deadline: None,
            grace: DEFAULT_GRACE,
            stdout: StreamState::new(Reason::Stdout, Level::Trace),
            stderr: StreamState::new(Reason::Stderr, Level::Error),
            logs: BTreeMap::new(),
            interrupt: InterruptToken::new(),
            state: ProcessState::NotStarted,
            code: 0,
        }
    }

    /// Create a process from a full shell command line, run through
    /// `sh -c`. Used for pipelines and for tools that only exist as shell
    /// one-liners.
    #[must_use]
    pub fn raw(cmd: impl Into<String>) -> Self {
        let mut p = Self::new();
        p.raw = Some(cmd.into());
        p
    }

    // -- builder -----------------------------------------------------------

    /// Display name used in logs and errors; defaults to the binary's file
    /// stem.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The executable to run.
    #[must_use]
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.bin = Some(path.into());
        self
    }

    /// Working directory; created at spawn time if missing.
    #[must_use]
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(self, value: impl ToArg) -> Self {
        self.arg_with(value, ArgOpts::default())
    }

    /// Append one argument with explicit formatting options.
    #[must_use]
    pub fn arg_with(self, value: impl ToArg, opts: ArgOpts) -> Self {
        self.arg_named("", value, opts)
    }

    /// Append a named argument (`-j 8`, `-DFOO=bar`, …). An empty value
    /// after formatting appends just the name; `opts.nospace` or a name
    /// ending in `=` joins name and value into a single token.
    #[must_use]
    pub fn arg_named(mut self, name: &str, value: impl ToArg, opts: ArgOpts) -> Self {
        if !opts.gate.allows() {
            return self;
        }

        let value = value.to_arg(&opts);

        if name.is_empty() && value.is_empty() {
            return self;
        }

        if name.is_empty() {
            self.args.push(value);
        } else if value.is_empty() {
            self.args.push(name.to_string());
        } else if opts.nospace || name.ends_with('=') {
            self.args.push(format!("{name}{value}"));
        } else {
            self.args.push(name.to_string());
            self.args.push(value);
        }

        self
    }

    /// Append several plain arguments.
    #[must_use]
    pub fn args<I, T>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToArg,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// Merge environment variables into the overlay applied at spawn time.
    #[must_use]
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Set one environment variable in the overlay.
    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Bytes fed to the child's stdin, which is closed once they are
    /// written. Without this, stdin is connected to the null device.
    #[must_use]
    pub fn stdin_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin_bytes = Some(bytes.into());
        self
    }

    /// Stdout policy.
    #[must_use]
    pub fn stdout_disposition(mut self, disposition: Disposition) -> Self {
        self.stdout.disposition = disposition;
        self
    }

    /// Level assigned to stdout lines before filtering.
    #[must_use]
    pub fn stdout_level(mut self, level: Level) -> Self {
        self.stdout.level = level;
        self
    }

    /// Per-line stdout filter.
    #[must_use]
    pub fn stdout_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&mut LineRecord<'_>) + Send + 'static,
    {
        self.stdout.filter = Some(Box::new(filter));
        self
    }

    /// Declared stdout encoding.
    #[must_use]
    pub fn stdout_encoding(mut self, encoding: Encoding) -> Self {
        self.stdout.encoding = encoding;
        self
    }

    /// Stderr policy.
    #[must_use]
    pub fn stderr_disposition(mut self, disposition: Disposition) -> Self {
        self.stderr.disposition = disposition;
        self
    }

    /// Level assigned to stderr lines before filtering.
    #[must_use]
    pub fn stderr_level(mut self, level: Level) -> Self {
        self.stderr.level = level;
        self
    }

    /// Per-line stderr filter.
    #[must_use]
    pub fn stderr_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(&mut LineRecord<'_>) + Send + 'static,
    {
        self.stderr.filter = Some(Box::new(filter));
        self
    }

    /// Declared stderr encoding.
    #[must_use]
    pub fn stderr_encoding(mut self, encoding: Encoding) -> Self {
        self.stderr.encoding = encoding;
        self
    }

    /// A disallowed exit code is reported but does not fail the run.
    #[must_use]
    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.allow_failure = allow;
        self
    }

    /// An interrupt request stops the process group (graceful request,
    /// grace period, forced kill). Without this flag an interrupt is only
    /// recorded and the process runs on.
    #[must_use]
    pub fn terminate_on_interrupt(mut self, terminate: bool) -> Self {
        self.terminate_on_interrupt = terminate;
        self
    }

    /// Don't replay buffered output after a successful exit.
    #[must_use]
    pub fn ignore_output_on_success(mut self, ignore: bool) -> Self {
        self.ignore_output_on_success = ignore;
        self
    }

    /// Exit codes considered success. Replaces the default `{0}`.
    #[must_use]
    pub fn success_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// A file the tool writes its own error report to; deleted before the
    /// run and dumped into the log after a failure.
    #[must_use]
    pub fn external_error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = Some(path.into());
        self
    }

    /// Wall-clock limit for the run; when it elapses the process group is
    /// stopped and the run reports [`ProcessError::TimedOut`].
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time allowed for a voluntary exit between the graceful stop request
    /// and the forced kill.
    #[must_use]
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    // -- accessors ---------------------------------------------------------

    /// Display name: the configured name, the binary's file stem, or the
    /// raw command line.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(bin) = &self.bin {
            if let Some(stem) = bin.file_stem() {
                return stem.to_string_lossy().into_owned();
            }
        }
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        "process".to_string()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Raw OS exit code of the last run, regardless of how it was
    /// classified. `0xffff` when the code could not be obtained.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code
    }

    /// Captured stdout text. Only meaningful for
    /// [`Disposition::Capture`]; empty otherwise.
    #[must_use]
    pub fn stdout_string(&self) -> String {
        match self.stdout.disposition {
            Disposition::Capture => self.stdout.captured.clone(),
            _ => String::new(),
        }
    }

    /// Captured stderr text. Only meaningful for
    /// [`Disposition::Capture`]; empty otherwise.
    #[must_use]
    pub fn stderr_string(&self) -> String {
        match self.stderr.disposition {
            Disposition::Capture => self.stderr.captured.clone(),
            _ => String::new(),
        }
    }

    /// Token that wakes the wait loop from another task or a signal
    /// handler.
    #[must_use]
    pub fn interrupt_token(&self) -> InterruptToken {
        self.interrupt.clone()
    }

    /// Request an interrupt. Honored per
    /// [`terminate_on_interrupt`](Process::terminate_on_interrupt).
    pub fn interrupt(&self) {
        trace!(target: TARGET, reason = %Reason::Command, "will interrupt");
        self.interrupt.interrupt();
    }

    /// Finalize a finished run. [`run`](Process::run) already releases all
    /// OS resources on every exit path; this settles the state machine.
    /// Idempotent.
    pub fn join(&mut self) {
        if matches!(
            self.state,
            ProcessState::Completed
                | ProcessState::Interrupted
                | ProcessState::TimedOut
                | ProcessState::Joined
        ) {
            self.state = ProcessState::Joined;
        }
    }

    /// Render the process as a POSIX shell command line: the raw command if
    /// one was set, otherwise the quoted binary and arguments.
    #[must_use]
    pub fn shell_command(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let Some(bin) = &self.bin else {
            return String::new();
        };
        let mut cmd = shell_quote(&bin.to_string_lossy()).into_owned();
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(&shell_quote(arg));
        }
        cmd
    }

    pub(crate) fn has_command(&self) -> bool {
        self.raw.is_some() || self.bin.is_some()
    }

    pub(crate) fn into_raw(mut self, cmd: String) -> Self {
        self.raw = Some(cmd);
        self.bin = None;
        self.args.clear();
        self
    }

    // -- lifecycle ---------------------------------------------------------

    /// Run the process to completion: spawn, supervise both streams, apply
    /// interrupt/deadline escalation, evaluate the exit code.
    ///
    /// Returns `Ok` for success (exit code in the success set), for allowed
    /// failures, and for interrupted runs; inspect
    /// [`state`](Process::state) and [`exit_code`](Process::exit_code) to
    /// tell them apart.
    pub async fn run(&mut self) -> Result<(), ProcessError> {
        if !self.has_command() {
            return Err(ProcessError::NothingToRun);
        }

        if let Some(cwd) = &self.cwd {
            debug!(target: TARGET, reason = %Reason::Command, "> cd {}", cwd.display());
        }
        debug!(target: TARGET, reason = %Reason::Command, "> {}", self.shell_command());

        self.remove_stale_error_log().await;
        self.logs.clear();
        self.stdout.reset();
        self.stderr.reset();
        self.code = 0;

        let mut running = self.spawn().await?;
        self.state = ProcessState::Running;

        let waited = match self.wait_loop(&mut running).await {
            Ok(waited) => waited,
            Err(e) => {
                // never leave a child behind, even on a wait failure
                running.terminate();
                let _ = running.child.wait().await;
                self.finish_streams(&mut running).await;
                self.state = ProcessState::Completed;
                return Err(e);
            }
        };

        self.finish_streams(&mut running).await;
        drop(running);

        self.evaluate(waited).await
    }

    /// Multiplex child exit, stream readiness, the interrupt token and the
    /// deadline until the exit signal fires.
    async fn wait_loop(&mut self, running: &mut Running) -> Result<Waited, ProcessError> {
        let interrupt = self.interrupt.clone();
        let quiet = self.ignore_output_on_success;
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let deadline_at = deadline.unwrap_or_else(far_future);

        let mut stop: Option<Stop> = None;
        let mut grace_until: Option<Instant> = None;
        let mut interrupt_seen = false;

        let status = loop {
            tokio::select! {
                status = running.child.wait() => {
                    break status.map_err(|source| ProcessError::Wait {
                        name: self.display_name(),
                        source,
                    })?;
                }

                chunk = pipe_next(&mut running.stdout) => match chunk {
                    Ok(Some(bytes)) => self.stdout.feed(&bytes, false, quiet, &mut self.logs),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(target: TARGET, reason = %Reason::Stdout, "read failed: {e}");
                    }
                },

                chunk = pipe_next(&mut running.stderr) => match chunk {
                    Ok(Some(bytes)) => self.stderr.feed(&bytes, false, quiet, &mut self.logs),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(target: TARGET, reason = %Reason::Stderr, "read failed: {e}");
                    }
                },

                _ = interrupt.interrupted(), if !interrupt_seen => {
                    interrupt_seen = true;
                    if self.terminate_on_interrupt {
                        trace!(
                            target: TARGET, reason = %Reason::Command,
                            "interrupt: requesting process group stop"
                        );
                        running.request_stop();
                        stop = Some(Stop::Interrupted);
                        grace_until = Some(Instant::now() + self.grace);
                    } else {
                        trace!(
                            target: TARGET, reason = %Reason::Command,
                            "interrupt requested, process left running"
                        );
                    }
                }

                _ = sleep_until(deadline_at), if deadline.is_some() && stop.is_none() => {
                    warn!(
                        target: TARGET, reason = %Reason::Command,
                        "deadline elapsed, stopping process group"
                    );
                    running.request_stop();
                    stop = Some(Stop::TimedOut);
                    grace_until = Some(Instant::now() + self.grace);
                }

                _ = sleep_until(grace_until.unwrap_or(deadline_at)), if grace_until.is_some() => {
                    trace!(
                        target: TARGET, reason = %Reason::Command,
                        "grace period over, terminating"
                    );
                    running.terminate();
                    grace_until = None;
                }
            }
        };

        Ok(Waited {
            status,
            stop,
            interrupt_seen,
        })
    }

    /// Drain both streams after the exit signal and flush pending partial
    /// lines.
    async fn finish_streams(&mut self, running: &mut Running) {
        let quiet = self.ignore_output_on_success;
        drain_stream(&mut running.stdout, &mut self.stdout, &mut self.logs, quiet).await;
        drain_stream(&mut running.stderr, &mut self.stderr, &mut self.logs, quiet).await;
        if let Some(task) = running.stdin_task.take() {
            task.abort();
        }
    }

    async fn evaluate(&mut self, waited: Waited) -> Result<(), ProcessError> {
        self.code = waited.status.code().unwrap_or(CODE_UNAVAILABLE);

        match waited.stop {
            Some(Stop::TimedOut) => {
                self.state = ProcessState::TimedOut;
                self.dump_failure().await;
                Err(ProcessError::TimedOut {
                    name: self.display_name(),
                })
            }
            Some(Stop::Interrupted) => {
                self.state = ProcessState::Interrupted;
                trace!(target: TARGET, reason = %Reason::Command, "process interrupted and finished");
                Ok(())
            }
            None => {
                self.state = ProcessState::Completed;

                if waited.interrupt_seen {
                    // the orchestrator is shutting down; the exit code no
                    // longer matters
                    trace!(target: TARGET, reason = %Reason::Command, "process interrupted and finished");
                    return Ok(());
                }

                if self.success_codes.contains(&self.code) {
                    self.on_success();
                    Ok(())
                } else if self.allow_failure {
                    trace!(
                        target: TARGET, reason = %Reason::Command,
                        "process failed but failure was allowed"
                    );
                    Ok(())
                } else {
                    self.dump_failure().await;
                    emit_line(
                        Level::Error,
                        Reason::Command,
                        &format!("{} returned {}", self.display_name(), self.code),
                    );
                    Err(ProcessError::Failed {
                        name: self.display_name(),
                        code: self.code,
                    })
                }
            }
        }
    }

    fn on_success(&mut self) {
        if self.ignore_output_on_success {
            trace!(
                target: TARGET, reason = %Reason::Command,
                "process exit code is {} (considered success)", self.code
            );
            return;
        }

        // captured output is replayed once the run is known good
        for stream in [&self.stdout, &self.stderr] {
            if stream.disposition == Disposition::Capture {
                for line in stream.captured.lines() {
                    emit_line(stream.level, stream.reason, line);
                }
            }
        }

        let warnings = self.logs.get(&Level::Warn).map_or(0, Vec::len);
        let errors = self.logs.get(&Level::Error).map_or(0, Vec::len);

        if warnings == 0 && errors == 0 {
            trace!(
                target: TARGET, reason = %Reason::Command,
                "process exit code is {} (considered success)", self.code
            );
            return;
        }

        warn!(
            target: TARGET, reason = %Reason::Command,
            "process exit code is {} (considered success), but stderr had something", self.code
        );

        // don't re-log lines that were already forwarded live
        if self.stderr.disposition != Disposition::Forward {
            warn!(target: TARGET, reason = %Reason::Command, "process was: {}", self.shell_command());
            warn!(target: TARGET, reason = %Reason::Command, "stderr:");
            for level in [Level::Warn, Level::Error] {
                if let Some(lines) = self.logs.get(&level) {
                    for line in lines {
                        warn!(target: TARGET, reason = %Reason::Stderr, "        {line}");
                    }
                }
            }
        }
    }

    /// Emit everything useful for diagnosing a failed run: the external
    /// error log if one was configured, then both streams' full content.
    async fn dump_failure(&mut self) {
        self.dump_error_log_file().await;
        self.dump_stream(Reason::Stdout);
        self.dump_stream(Reason::Stderr);
    }

    fn dump_stream(&self, reason: Reason) {
        let (state, what) = match reason {
            Reason::Stdout => (&self.stdout, "stdout"),
            _ => (&self.stderr, "stderr"),
        };

        if !state.disposition.piped() {
            return;
        }

        let text = state.buffer.text();
        if text.is_empty() {
            if reason == Reason::Stderr {
                emit_line(
                    Level::Error,
                    Reason::Command,
                    &format!("{} failed, stderr was empty", self.display_name()),
                );
            }
            return;
        }

        emit_line(
            Level::Error,
            Reason::Command,
            &format!(
                "{} failed, {}, content of {what}:",
                self.display_name(),
                self.shell_command()
            ),
        );
        for line in text.lines() {
            emit_line(Level::Error, reason, &format!("        {line}"));
        }
    }

    async fn dump_error_log_file(&self) {
        let Some(path) = &self.error_log else {
            return;
        };

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return;
                }
                let mut buf = LineBuffer::new(Encoding::Utf8);
                buf.add(&bytes);
                emit_line(
                    Level::Error,
                    Reason::Command,
                    &format!(
                        "{} failed, content of {}:",
                        self.display_name(),
                        path.display()
                    ),
                );
                buf.next_lines(true, |line| {
                    emit_line(Level::Error, Reason::Command, &format!("        {line}"));
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    target: TARGET, reason = %Reason::Command,
                    "external error log file {} doesn't exist", path.display()
                );
            }
            Err(e) => {
                debug!(
                    target: TARGET, reason = %Reason::Command,
                    "couldn't read external error log file {}: {e}", path.display()
                );
            }
        }
    }

    async fn remove_stale_error_log(&self) {
        let Some(path) = &self.error_log else {
            return;
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                trace!(
                    target: TARGET, reason = %Reason::Command,
                    "external error log file {} existed, deleted", path.display()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    target: TARGET, reason = %Reason::Command,
                    "couldn't delete external error log file {}: {e}", path.display()
                );
            }
        }
    }

    async fn spawn(&mut self) -> Result<Running, ProcessError> {
        let mut cmd = if let Some(raw) = &self.raw {
            let mut c = Command::new("sh");
            c.arg("-c").arg(raw);
            c
        } else {
            let bin = self.bin.clone().ok_or(ProcessError::NothingToRun)?;
            let mut c = Command::new(bin);
            c.args(&self.args);
            c
        };

        if let Some(cwd) = &self.cwd {
            if !cwd.exists() {
                tokio::fs::create_dir_all(cwd)
                    .await
                    .map_err(|source| ProcessError::Workdir {
                        path: cwd.clone(),
                        source,
                    })?;
            }
            cmd.current_dir(cwd);
        }

        cmd.envs(&self.env);

        cmd.stdin(if self.stdin_bytes.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(stdio_for(self.stdout.disposition));
        cmd.stderr(stdio_for(self.stderr.disposition));

        // the child gets its own process group so teardown reaches every
        // descendant it spawns
        #[cfg(unix)]
        cmd.process_group(0);

        // backstop: no exit path may leave the child running unobserved
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            name: self.display_name(),
            source,
        })?;

        let pid = child.id().unwrap_or(0);
        trace!(target: TARGET, reason = %Reason::Command, "pid {pid}");

        #[cfg(unix)]
        let group = (pid != 0).then(|| ProcessGroup {
            pgid: nix::unistd::Pid::from_raw(pid as i32),
        });

        let stdout = if self.stdout.disposition.piped() {
            let pipe = child.stdout.take().ok_or_else(|| ProcessError::Wire {
                name: self.display_name(),
                stream: "stdout",
            })?;
            Some(PipeReader::spawn(pipe))
        } else {
            None
        };

        let stderr = if self.stderr.disposition.piped() {
            let pipe = child.stderr.take().ok_or_else(|| ProcessError::Wire {
                name: self.display_name(),
                stream: "stderr",
            })?;
            Some(PipeReader::spawn(pipe))
        } else {
            None
        };

        let stdin_task = match (&self.stdin_bytes, child.stdin.take()) {
            (Some(bytes), Some(mut sink)) => {
                let bytes = bytes.clone();
                Some(tokio::spawn(async move {
                    // a child that exits early breaks the pipe, which is fine
                    let _ = sink.write_all(&bytes).await;
                    let _ = sink.shutdown().await;
                }))
            }
            _ => None,
        };

        Ok(Running {
            child,
            #[cfg(unix)]
            group,
            stdout,
            stderr,
            stdin_task,
        })
    }
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Wait-loop outcome: the exit status plus how the run was stopped, if it
/// was.
struct Waited {
    status: ExitStatus,
    stop: Option<Stop>,
    interrupt_seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Interrupted,
    TimedOut,
}

/// Ownership token for the child's process group: signalling it reaches the
/// process and every descendant it spawned.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
struct ProcessGroup {
    pgid: nix::unistd::Pid,
}

/// Live OS resources of one run, exclusively owned by the controller.
struct Running {
    child: Child,
    #[cfg(unix)]
    group: Option<ProcessGroup>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
    stdin_task: Option<JoinHandle<()>>,
}

impl Running {
    /// Graceful stop request to the whole group.
    fn request_stop(&mut self) {
        #[cfg(unix)]
        {
            if self.signal_group(nix::sys::signal::Signal::SIGINT) {
                return;
            }
        }
        let _ = self.child.start_kill();
    }

    /// Forced kill of the whole group. Idempotent.
    fn terminate(&mut self) {
        trace!(target: TARGET, reason = %Reason::Command, "terminating process group");
        #[cfg(unix)]
        {
            if self.signal_group(nix::sys::signal::Signal::SIGKILL) {
                return;
            }
        }
        let _ = self.child.start_kill();
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> bool {
        let Some(group) = self.group else {
            return false;
        };
        match nix::sys::signal::killpg(group.pgid, signal) {
            Ok(()) => true,
            // the group is already gone
            Err(nix::errno::Errno::ESRCH) => true,
            Err(e) => {
                warn!(
                    target: TARGET, reason = %Reason::Command,
                    "failed to signal process group: {e}"
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stdio_for(disposition: Disposition) -> Stdio {
    match disposition {
        Disposition::Forward | Disposition::Capture => Stdio::piped(),
        Disposition::Discard => Stdio::null(),
        Disposition::Inherit => Stdio::inherit(),
    }
}

/// Next chunk from an optional reader; pends forever once the stream is
/// closed or absent so the wait loop stops polling it.
async fn pipe_next(reader: &mut Option<PipeReader>) -> io::Result<Option<Vec<u8>>> {
    match reader {
        Some(r) if !r.closed() => {
            r.ready().await;
            r.read(false)
        }
        _ => std::future::pending().await,
    }
}

/// Drain whatever is still in flight after the exit signal, then flush the
/// stream's pending partial line.
async fn drain_stream(
    reader: &mut Option<PipeReader>,
    state: &mut StreamState,
    logs: &mut BTreeMap<Level, Vec<String>>,
    quiet: bool,
) {
    if let Some(r) = reader {
        while !r.closed() {
            let _ = timeout(DRAIN_WINDOW, r.ready()).await;
            match r.read(true) {
                Ok(Some(bytes)) => state.feed(&bytes, false, quiet, logs),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        target: TARGET, reason = %state.reason,
                        "read failed while draining: {e}"
                    );
                }
            }
        }
    }
    state.feed(&[], true, quiet, logs);
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365)
}
