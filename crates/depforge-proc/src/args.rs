// SPDX-License-Identifier: MIT OR Apache-2.0
//! Formatting of command-line arguments over a closed set of value kinds.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::stream::Level;

/// When an argument is actually included in the command line, keyed off the
/// orchestrator's active log verbosity. Lets recipes pass `-v`-style flags
/// to child tools only when their output would be shown anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgGate {
    /// Always included.
    #[default]
    Always,
    /// Included only when debug logging is enabled.
    DebugOnly,
    /// Included only when trace logging is enabled.
    TraceOnly,
    /// Included only when trace logging is disabled — for `-quiet`-style
    /// flags that would hide output the orchestrator wants verbose.
    QuietOnly,
}

impl ArgGate {
    pub(crate) fn allows(self) -> bool {
        match self {
            ArgGate::Always => true,
            ArgGate::DebugOnly => Level::Debug.enabled(),
            ArgGate::TraceOnly => Level::Trace.enabled(),
            ArgGate::QuietOnly => !Level::Trace.enabled(),
        }
    }
}

/// Formatting options for one argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgOpts {
    /// Inclusion gate.
    pub gate: ArgGate,
    /// Join a named argument and its value without a separator
    /// (`-DFOO=bar` style). Implied when the name ends with `=`.
    pub nospace: bool,
    /// Normalize path separators to forward slashes.
    pub forward_slashes: bool,
}

/// A value formattable as a command-line argument.
pub trait ToArg {
    /// Render the value. `opts` only affects kinds it applies to.
    fn to_arg(&self, opts: &ArgOpts) -> String;
}

impl ToArg for &str {
    fn to_arg(&self, _opts: &ArgOpts) -> String {
        (*self).to_string()
    }
}

impl ToArg for String {
    fn to_arg(&self, _opts: &ArgOpts) -> String {
        self.clone()
    }
}

impl ToArg for &Path {
    fn to_arg(&self, opts: &ArgOpts) -> String {
        let s = self.to_string_lossy().into_owned();
        if opts.forward_slashes {
            s.replace('\\', "/")
        } else {
            s
        }
    }
}

impl ToArg for PathBuf {
    fn to_arg(&self, opts: &ArgOpts) -> String {
        self.as_path().to_arg(opts)
    }
}

macro_rules! int_to_arg {
    ($($ty:ty),*) => {
        $(impl ToArg for $ty {
            fn to_arg(&self, _opts: &ArgOpts) -> String {
                self.to_string()
            }
        })*
    };
}

int_to_arg!(i32, i64, u32, u64, usize);

/// Quote a string for inclusion in a POSIX shell command line.
///
/// Plain words pass through untouched; anything else is single-quoted with
/// embedded quotes escaped.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let plain = !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'_' | b'-' | b'.' | b'/' | b'=' | b':' | b'+' | b',' | b'@' | b'%')
        });

    if plain {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}
